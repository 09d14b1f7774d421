//! History / daily / snapshot persistence for enriched records.
//!
//! Each call to [`archive_at`] applies three independent policies:
//!
//! | Target | Policy |
//! |--------|--------|
//! | latest snapshot, export snapshot | overwritten with exactly this record |
//! | history log | appended unless the **last** entry has the same CID |
//! | daily log (`YYYYMMDD.jsonl`) | appended unless **any** entry that day has the same CID |
//!
//! The history check only looks at the tail, so a CID that reappears after
//! a different one is appended again. Downstream consumers count on that,
//! and it must stay distinct from the daily log's full-scan guarantee.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};

use crate::config::{Config, PathsConfig};
use crate::error::RecordError;
use crate::jsonl;
use crate::models::EnrichedRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub history_appended: bool,
    pub daily_appended: bool,
    /// `YYYYMMDD` key of the daily log that was consulted.
    pub day: String,
}

/// Daily log key: date portion of `record.date` without dashes, or the run
/// date when the record has no date.
pub fn day_key(record: &EnrichedRecord, now: DateTime<Local>) -> String {
    match record.date_part() {
        Some(date) => date.replace(['-', '/'], ""),
        None => now.format("%Y%m%d").to_string(),
    }
}

pub fn daily_path(paths: &PathsConfig, day: &str) -> PathBuf {
    paths.daily_dir.join(format!("{}.jsonl", day))
}

/// Archive `record` as of `now`. Stamps the ingestion timestamp if the
/// record has none yet and returns the record as written.
pub fn archive_at(
    paths: &PathsConfig,
    record: &EnrichedRecord,
    now: DateTime<Local>,
) -> Result<(EnrichedRecord, ArchiveOutcome)> {
    if !record.has_cid() {
        return Err(RecordError::MissingCid { stage: "archive" }.into());
    }

    let mut rec = record.clone();
    if rec.ingested_at.is_none() {
        rec.ingested_at = Some(now.with_timezone(&Utc).to_rfc3339());
    }

    jsonl::write_snapshot(&paths.latest, &rec)?;
    jsonl::write_snapshot(&paths.export, &rec)?;

    let history_appended = append_history(&paths.history, &rec)?;

    let day = day_key(&rec, now);
    let day_path = daily_path(paths, &day);
    let daily_appended = if jsonl::contains_cid(&day_path, &rec.cid)? {
        false
    } else {
        jsonl::append_record(&day_path, &rec)?;
        true
    };

    Ok((
        rec,
        ArchiveOutcome {
            history_appended,
            daily_appended,
            day,
        },
    ))
}

pub fn archive(paths: &PathsConfig, record: &EnrichedRecord) -> Result<(EnrichedRecord, ArchiveOutcome)> {
    archive_at(paths, record, Local::now())
}

fn append_history(path: &Path, rec: &EnrichedRecord) -> Result<bool> {
    let last_cid = jsonl::read_last_record(path)?.and_then(|r| r.cid());
    if last_cid.as_deref() == Some(rec.cid.as_str()) {
        return Ok(false);
    }
    jsonl::append_record(path, rec)?;
    Ok(true)
}

/// Print the per-log status lines for one archived record.
pub fn print_outcome(cid: &str, outcome: &ArchiveOutcome) {
    if outcome.history_appended {
        println!("[OK] history appended: {}", cid);
    } else {
        println!("[SKIP] history same cid: {}", cid);
    }
    if outcome.daily_appended {
        println!("[OK] daily appended: {}.jsonl {}", outcome.day, cid);
    } else {
        println!("[SKIP] daily already has: {}", cid);
    }
}

/// `cath archive`: archive whatever the latest snapshot holds.
pub fn run_archive(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let Some(raw) = jsonl::read_last_record(&paths.latest)? else {
        println!("[INFO] latest snapshot not found or empty: {}", paths.latest.display());
        return Ok(());
    };

    let record = EnrichedRecord::from_raw(raw);
    if !record.has_cid() {
        println!("[WARN] latest snapshot has no cid; nothing archived");
        return Ok(());
    }

    let (rec, outcome) = archive(paths, &record)?;
    print_outcome(&rec.cid, &outcome);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn paths(root: &Path) -> PathsConfig {
        PathsConfig {
            latest: root.join("out/latest.jsonl"),
            history: root.join("out/history.jsonl"),
            daily_dir: root.join("out/daily"),
            processed: root.join("out/processed.txt"),
            items_dir: root.join("out/items"),
            export: root.join("exports/latest.jsonl"),
            drafts_dir: root.join("drafts"),
            queue_dir: root.join("queue"),
            published_dir: root.join("published"),
        }
    }

    fn record(cid: &str, date: Option<&str>) -> EnrichedRecord {
        EnrichedRecord {
            cid: cid.to_string(),
            date: date.map(str::to_string),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 11, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn same_cid_twice_in_a_row_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let p = paths(tmp.path());
        for cid in ["a", "b", "x"] {
            archive_at(&p, &record(cid, None), now()).unwrap();
        }
        let before = jsonl::count_lines(&p.history).unwrap();
        let (_, outcome) = archive_at(&p, &record("x", None), now()).unwrap();
        assert!(!outcome.history_appended);
        assert!(!outcome.daily_appended);
        assert_eq!(jsonl::count_lines(&p.history).unwrap(), before);
    }

    #[test]
    fn daily_dedup_is_stronger_than_history() {
        let tmp = TempDir::new().unwrap();
        let p = paths(tmp.path());
        for cid in ["a", "b", "a"] {
            archive_at(&p, &record(cid, Some("2025-11-28 10:00:00")), now()).unwrap();
        }
        assert_eq!(jsonl::count_lines(&p.history).unwrap(), 3);
        assert_eq!(
            jsonl::count_lines(&daily_path(&p, "20251128")).unwrap(),
            2
        );
    }

    #[test]
    fn torn_daily_line_does_not_block_archive() {
        let tmp = TempDir::new().unwrap();
        let p = paths(tmp.path());
        let day_path = daily_path(&p, "20251128");
        std::fs::create_dir_all(&p.daily_dir).unwrap();
        let mut bytes = b"{\"cid\":\"a1\",\"title\":\"".to_vec();
        bytes.extend_from_slice(&"素人".as_bytes()[..4]);
        std::fs::write(&day_path, bytes).unwrap();

        let (_, outcome) =
            archive_at(&p, &record("b2", Some("2025-11-28 10:00:00")), now()).unwrap();
        assert!(outcome.history_appended);
        assert!(outcome.daily_appended);
        assert!(jsonl::contains_cid(&day_path, "b2").unwrap());

        let (_, outcome) =
            archive_at(&p, &record("b2", Some("2025-11-28 10:00:00")), now()).unwrap();
        assert!(!outcome.daily_appended);
    }

    #[test]
    fn day_key_falls_back_to_run_date() {
        assert_eq!(day_key(&record("a", None), now()), "20251130");
        assert_eq!(
            day_key(&record("a", Some("2025-01-02 00:00:00")), now()),
            "20250102"
        );
    }

    #[test]
    fn snapshots_hold_exactly_current_record() {
        let tmp = TempDir::new().unwrap();
        let p = paths(tmp.path());
        archive_at(&p, &record("a", None), now()).unwrap();
        archive_at(&p, &record("b", None), now()).unwrap();
        for snap in [&p.latest, &p.export] {
            assert_eq!(jsonl::count_lines(snap).unwrap(), 1);
            let last = jsonl::read_last_record(snap).unwrap().unwrap();
            assert_eq!(last.cid().as_deref(), Some("b"));
        }
    }

    #[test]
    fn stamps_ingestion_time_once() {
        let tmp = TempDir::new().unwrap();
        let p = paths(tmp.path());
        let mut rec = record("a", None);
        rec.ingested_at = Some("2020-01-01T00:00:00+00:00".to_string());
        let (written, _) = archive_at(&p, &rec, now()).unwrap();
        assert_eq!(written.ingested_at.as_deref(), Some("2020-01-01T00:00:00+00:00"));

        let (fresh, _) = archive_at(&p, &record("b", None), now()).unwrap();
        assert!(fresh.ingested_at.is_some());
    }

    #[test]
    fn record_without_cid_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let p = paths(tmp.path());
        assert!(archive_at(&p, &record("", None), now()).is_err());
        assert!(!p.history.exists());
    }
}
