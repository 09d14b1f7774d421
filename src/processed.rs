//! Processed-CID set and automatic CID selection.
//!
//! The set is a plain text file, one CID per line, append-only. Automatic
//! runs pick the next candidate that is not in it.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::jsonl::ensure_parent;
use crate::models::canonical_cid;

#[derive(Debug, Clone)]
pub struct ProcessedSet {
    path: PathBuf,
    seen: HashSet<String>,
}

impl ProcessedSet {
    /// Load the set; a missing file is an empty set. Lines that are not a
    /// valid CID are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let mut seen = HashSet::new();
        if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            seen.extend(text.lines().filter_map(canonical_cid));
        }
        Ok(Self {
            path: path.to_path_buf(),
            seen,
        })
    }

    pub fn contains(&self, cid: &str) -> bool {
        self.seen.contains(cid)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn as_set(&self) -> &HashSet<String> {
        &self.seen
    }

    /// Record `cid` as processed. Already-known CIDs are not written twice.
    pub fn mark(&mut self, cid: &str) -> Result<()> {
        if self.seen.contains(cid) {
            return Ok(());
        }
        ensure_parent(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(file, "{}", cid)?;
        self.seen.insert(cid.to_string());
        Ok(())
    }
}

/// The `n`-th (1-indexed) candidate not in `processed`.
///
/// With fewer than `n` unseen candidates the last unseen one is returned;
/// `None` only when every candidate has been processed. `n < 1` is treated
/// as 1.
pub fn select_next_unseen(
    candidates: &[String],
    processed: &HashSet<String>,
    n: usize,
) -> Option<String> {
    let n = n.max(1);
    let unseen: Vec<&String> = candidates
        .iter()
        .filter(|cid| !processed.contains(cid.as_str()))
        .collect();
    unseen
        .get(n - 1)
        .or_else(|| unseen.last())
        .map(|cid| cid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn set(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_nth_unseen() {
        let candidates = cids(&["a", "b", "c", "d"]);
        let processed = set(&["a", "c"]);
        assert_eq!(select_next_unseen(&candidates, &processed, 1).as_deref(), Some("b"));
        assert_eq!(select_next_unseen(&candidates, &processed, 2).as_deref(), Some("d"));
    }

    #[test]
    fn degrades_to_last_unseen() {
        let candidates = cids(&["a", "b", "c"]);
        let processed = set(&["a"]);
        assert_eq!(select_next_unseen(&candidates, &processed, 5).as_deref(), Some("c"));
    }

    #[test]
    fn none_when_all_seen() {
        let candidates = cids(&["a", "b"]);
        assert_eq!(select_next_unseen(&candidates, &set(&["a", "b"]), 1), None);
        assert_eq!(select_next_unseen(&[], &HashSet::new(), 1), None);
    }

    #[test]
    fn zero_index_means_first() {
        let candidates = cids(&["a", "b"]);
        assert_eq!(select_next_unseen(&candidates, &HashSet::new(), 0).as_deref(), Some("a"));
    }

    #[test]
    fn mark_persists_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out/processed.txt");
        let mut set = ProcessedSet::load(&path).unwrap();
        assert!(set.is_empty());
        set.mark("abc123").unwrap();
        set.mark("abc123").unwrap();
        set.mark("xyz9").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "abc123\nxyz9\n");

        let reloaded = ProcessedSet::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("xyz9"));
    }

    #[test]
    fn load_ignores_junk_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("processed.txt");
        fs::write(&path, "ABC123\n\n  \nnot a cid!\nxyz9\n").unwrap();
        let set = ProcessedSet::load(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("abc123"));
    }
}
