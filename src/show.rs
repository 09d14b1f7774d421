//! `cath show <cid>`: the most recent history entry for one CID.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::config::Config;
use crate::jsonl;
use crate::models::canonical_cid;

/// Last history entry whose CID is `cid`, as stored.
pub fn latest_entry(config: &Config, cid: &str) -> Result<Option<Value>> {
    let Some(cid) = canonical_cid(cid) else {
        bail!("Invalid cid: {:?}", cid);
    };
    Ok(jsonl::read_records(&config.paths.history)?
        .into_iter()
        .rev()
        .find(|r| r.cid().as_deref() == Some(cid.as_str()))
        .map(|r| r.into_value()))
}

pub fn run_show(config: &Config, cid: &str) -> Result<()> {
    match latest_entry(config, cid)? {
        Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
        None => bail!("No history entry for {}", cid),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichedRecord;
    use tempfile::TempDir;

    #[test]
    fn picks_most_recent_entry() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.history = tmp.path().join("history.jsonl");
        for title in ["first", "second"] {
            let rec = EnrichedRecord {
                cid: "abc1".into(),
                title: Some(title.into()),
                ..Default::default()
            };
            jsonl::append_record(&config.paths.history, &rec).unwrap();
        }

        let entry = latest_entry(&config, "ABC1").unwrap().unwrap();
        assert_eq!(entry["title"], "second");
        assert!(latest_entry(&config, "zzz9").unwrap().is_none());
        assert!(latest_entry(&config, "bad cid").is_err());
    }
}
