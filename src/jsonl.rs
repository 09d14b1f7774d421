//! Newline-delimited JSON logs.
//!
//! The history log, daily logs and snapshots are plain JSONL files. Readers
//! skip blank lines and log a warning for lines that do not parse; a run
//! killed mid-write therefore never poisons later runs. Appends first
//! terminate an unterminated last line so a torn write cannot swallow the
//! next record.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::models::{EnrichedRecord, RawRecord};

const TAIL_STEP: u64 = 4096;

/// Every parseable record in the file, in order. A missing file is empty.
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, raw) in BufReader::new(file).split(b'\n').enumerate() {
        let raw = raw.with_context(|| format!("Failed to read {}", path.display()))?;
        let Ok(line) = std::str::from_utf8(&raw) else {
            warn!(path = %path.display(), line = idx + 1, "skipping line with invalid UTF-8");
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match RawRecord::parse(line) {
            Some(rec) => out.push(rec),
            None => warn!(path = %path.display(), line = idx + 1, "skipping malformed JSON line"),
        }
    }
    Ok(out)
}

/// The last parseable record, reading backwards from the end of the file so
/// the cost does not grow with the log.
pub fn read_last_record(path: &Path) -> Result<Option<RawRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let size = file.seek(SeekFrom::End(0))?;

    let mut pos = size;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let step = TAIL_STEP.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;

        // Lines fully inside `buf`: everything after the first newline, or
        // the whole buffer once we reached the start of the file.
        let complete: &[u8] = if pos == 0 {
            &buf
        } else {
            match buf.iter().position(|b| *b == b'\n') {
                Some(i) => &buf[i + 1..],
                None => &[],
            }
        };

        for line in complete.rsplit(|b| *b == b'\n') {
            let text = String::from_utf8_lossy(line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match RawRecord::parse(text) {
                Some(rec) => return Ok(Some(rec)),
                None => warn!(path = %path.display(), "skipping malformed trailing JSON line"),
            }
        }

        if pos == 0 {
            return Ok(None);
        }
        // Drop the lines already inspected, keep the partial head.
        if let Some(i) = buf.iter().position(|b| *b == b'\n') {
            buf.truncate(i + 1);
        }
    }
}

/// Full scan: does any record in the file carry `cid`?
pub fn contains_cid(path: &Path, cid: &str) -> Result<bool> {
    Ok(read_records(path)?
        .iter()
        .any(|rec| rec.cid().as_deref() == Some(cid)))
}

/// Append one record as a line, creating parent directories as needed.
pub fn append_record(path: &Path, record: &EnrichedRecord) -> Result<()> {
    ensure_parent(path)?;
    let line = record.to_json_line()?;

    let needs_newline = match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => !ends_with_newline(path)?,
        _ => false,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for append", path.display()))?;
    if needs_newline {
        file.write_all(b"\n")?;
    }
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Replace the file with exactly one record line.
pub fn write_snapshot(path: &Path, record: &EnrichedRecord) -> Result<()> {
    ensure_parent(path)?;
    let mut line = record.to_json_line()?;
    line.push('\n');
    fs::write(path, line).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Number of non-blank lines, parseable or not.
pub fn count_lines(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path)?;
    let mut n = 0;
    for raw in BufReader::new(file).split(b'\n') {
        if !raw?.iter().all(u8::is_ascii_whitespace) {
            n += 1;
        }
    }
    Ok(n)
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(cid: &str) -> EnrichedRecord {
        EnrichedRecord {
            cid: cid.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nope.jsonl");
        assert!(read_records(&path).unwrap().is_empty());
        assert!(read_last_record(&path).unwrap().is_none());
        assert!(!contains_cid(&path, "a").unwrap());
    }

    #[test]
    fn skips_blank_and_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        fs::write(&path, "{\"cid\":\"a\"}\n\n{broken\n{\"cid\":\"b\"}\n").unwrap();
        let recs = read_records(&path).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].cid().as_deref(), Some("b"));
    }

    #[test]
    fn torn_multibyte_tail_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("20251128.jsonl");
        let mut bytes = b"{\"cid\":\"a1\"}\n{\"cid\":\"a2\",\"title\":\"".to_vec();
        bytes.extend_from_slice(&"素人".as_bytes()[..4]);
        fs::write(&path, bytes).unwrap();

        let recs = read_records(&path).unwrap();
        assert_eq!(recs.len(), 1);
        assert!(contains_cid(&path, "a1").unwrap());
        assert!(!contains_cid(&path, "b2").unwrap());
        assert_eq!(count_lines(&path).unwrap(), 2);

        append_record(&path, &record("b2")).unwrap();
        assert!(contains_cid(&path, "b2").unwrap());
    }

    #[test]
    fn last_record_skips_torn_tail() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        fs::write(&path, "{\"cid\":\"a\"}\n{\"cid\":\"b\"}\n{\"cid\":\"c\",\"ti").unwrap();
        let last = read_last_record(&path).unwrap().unwrap();
        assert_eq!(last.cid().as_deref(), Some("b"));
    }

    #[test]
    fn last_record_across_chunk_boundary() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        let filler = "x".repeat(10_000);
        let content = format!(
            "{{\"cid\":\"a\"}}\n{{\"cid\":\"b\",\"pad\":\"{}\"}}\n\n",
            filler
        );
        fs::write(&path, content).unwrap();
        let last = read_last_record(&path).unwrap().unwrap();
        assert_eq!(last.cid().as_deref(), Some("b"));
    }

    #[test]
    fn append_repairs_unterminated_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        fs::write(&path, "{\"cid\":\"a\"}").unwrap();
        append_record(&path, &record("b")).unwrap();
        let recs = read_records(&path).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(count_lines(&path).unwrap(), 2);
    }

    #[test]
    fn snapshot_is_single_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub/latest.jsonl");
        write_snapshot(&path, &record("a")).unwrap();
        write_snapshot(&path, &record("b")).unwrap();
        assert_eq!(count_lines(&path).unwrap(), 1);
        assert_eq!(
            read_last_record(&path).unwrap().unwrap().cid().as_deref(),
            Some("b")
        );
    }
}
