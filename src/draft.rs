//! Draft and publish-queue generation.
//!
//! A draft is a Markdown file with YAML front matter, named
//! `<YYYYMMDD>_<cid>_<slug>.md` under `paths.drafts_dir`. Next to it a queue
//! descriptor `paths.queue_dir/<cid>.json` tells the publish importer which
//! draft to pick up.
//!
//! Three entry points:
//!
//! | Command | Record source | Existing draft |
//! |---------|---------------|----------------|
//! | `draft latest` | export snapshot, else latest snapshot | kept, queue refreshed |
//! | `draft daily [day]` | every record of one daily log | overwritten |
//! | `draft cid <cid>` | latest snapshot, history, source cache | overwritten |

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::archive;
use crate::config::Config;
use crate::error::RecordError;
use crate::jsonl;
use crate::models::{canonical_cid, EnrichedRecord, QueueEntry};
use crate::pipeline::merge_from_cache;
use crate::url_filter::dedup_preserving_order;

/// Heading that opens the review section. The publish importer reads the
/// review back from under it.
pub const REVIEW_HEADING: &str = "## レビュー";

pub(crate) const NO_REVIEW: &str = "（レビュー本文がありません。）";
const NO_SIZES: &str = "B-- W-- H--";
const DRAFT_SAMPLES: usize = 5;

/// YAML front matter of a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub cid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_movie_url: Option<String>,
}

/// File-name-safe form of a title.
pub fn slug(s: &str) -> Result<String> {
    let spaces = Regex::new(r"[ \t]+")?;
    let unsafe_chars = Regex::new(r"[^\w\-.ぁ-んァ-ン一-龯]")?;
    let spaced = spaces.replace_all(s.trim(), "_");
    let out: String = unsafe_chars.replace_all(&spaced, "").chars().take(80).collect();
    if out.is_empty() {
        Ok("untitled".to_string())
    } else {
        Ok(out)
    }
}

/// `YYYY-MM-DD` of the record's release date, or of `now`.
fn display_date(record: &EnrichedRecord, now: DateTime<Local>) -> String {
    record
        .date_part()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .unwrap_or_else(|| now.date_naive())
        .format("%Y-%m-%d")
        .to_string()
}

pub fn draft_file_name(record: &EnrichedRecord, now: DateTime<Local>) -> Result<String> {
    Ok(format!(
        "{}_{}_{}.md",
        archive::day_key(record, now),
        record.cid,
        slug(record.title.as_deref().unwrap_or(""))?
    ))
}

pub fn front_matter(record: &EnrichedRecord, now: DateTime<Local>) -> FrontMatter {
    FrontMatter {
        cid: record.cid.clone(),
        title: record
            .title
            .clone()
            .unwrap_or_else(|| "タイトル不明".to_string()),
        date: display_date(record, now),
        poster_image: record.poster_url.clone(),
        tags: dedup_preserving_order(
            record.genres.iter().filter(|g| !g.trim().is_empty()).cloned(),
        ),
        name: performer_name(record),
        maker: record.maker.clone(),
        label: record.label.clone(),
        series: record.series.clone(),
        sizes: record.sizes_display().map(str::to_string),
        affiliate_url: record.affiliate_url.clone(),
        sample_movie_url: record.sample_movie_url.clone(),
    }
}

fn performer_name(record: &EnrichedRecord) -> Option<String> {
    record.name.clone().or_else(|| {
        if record.performers.is_empty() {
            None
        } else {
            Some(record.performers.join("、"))
        }
    })
}

/// Render the full Markdown document for `record`.
pub fn build_markdown(record: &EnrichedRecord, now: DateTime<Local>) -> Result<String> {
    let front = front_matter(record, now);
    let yaml = serde_yaml::to_string(&front).context("Failed to serialize front matter")?;

    let dash = |v: Option<&str>| v.filter(|s| !s.trim().is_empty()).unwrap_or("-").to_string();
    let review = record
        .review_display()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(NO_REVIEW);

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&yaml);
    out.push_str("---\n\n");

    out.push_str(&format!("# {}\n\n", front.title));
    out.push_str("## 基本情報\n\n");
    out.push_str(&format!("* 出演者: {}\n", dash(front.name.as_deref())));
    out.push_str(&format!("* メーカー: {}\n", dash(front.maker.as_deref())));
    out.push_str(&format!("* レーベル: {}\n", dash(front.label.as_deref())));
    out.push_str(&format!(
        "* サイズ: {}\n",
        front.sizes.as_deref().unwrap_or(NO_SIZES)
    ));
    out.push_str(&format!(
        "* アフィリエイトURL: {}\n",
        dash(front.affiliate_url.as_deref())
    ));
    out.push_str(&format!(
        "* サンプル動画: {}\n\n",
        dash(front.sample_movie_url.as_deref())
    ));

    out.push_str(REVIEW_HEADING);
    out.push_str("\n\n");
    out.push_str(review);
    out.push_str("\n\n");

    out.push_str("## サンプル画像\n\n");
    for (i, url) in record.sample_images.iter().take(DRAFT_SAMPLES).enumerate() {
        out.push_str(&format!("![sample {}]({})\n", i + 1, url));
    }
    Ok(out)
}

/// Write the draft (unless it exists and `overwrite` is false) and its queue
/// descriptor. Returns the draft path and whether the draft was written.
pub fn write_draft_and_queue(
    config: &Config,
    record: &EnrichedRecord,
    now: DateTime<Local>,
    overwrite: bool,
) -> Result<(PathBuf, bool)> {
    if !record.has_cid() {
        return Err(RecordError::MissingCid { stage: "draft" }.into());
    }

    let draft_path = config.paths.drafts_dir.join(draft_file_name(record, now)?);
    let written = if draft_path.exists() && !overwrite {
        println!("[SKIP] draft exists: {}", draft_path.display());
        false
    } else {
        jsonl::ensure_parent(&draft_path)?;
        std::fs::write(&draft_path, build_markdown(record, now)?)
            .with_context(|| format!("Failed to write draft: {}", draft_path.display()))?;
        println!("[OK] draft: {}", draft_path.display());
        true
    };

    let entry = QueueEntry {
        cid: record.cid.clone(),
        draft_path: draft_path.display().to_string(),
        ready: true,
        title: record.title.clone(),
        date: record.date.clone(),
    };
    let queue_file = queue_path(config, &record.cid);
    jsonl::ensure_parent(&queue_file)?;
    std::fs::write(&queue_file, serde_json::to_string_pretty(&entry)?)
        .with_context(|| format!("Failed to write queue entry: {}", queue_file.display()))?;
    println!("[OK] queued: {}", queue_file.display());

    Ok((draft_path, written))
}

pub fn queue_path(config: &Config, cid: &str) -> PathBuf {
    config.paths.queue_dir.join(format!("{}.json", cid))
}

fn last_enriched(path: &Path) -> Result<Option<EnrichedRecord>> {
    Ok(jsonl::read_last_record(path)?.map(EnrichedRecord::from_raw))
}

/// `cath draft latest`.
pub fn generate_latest(config: &Config) -> Result<()> {
    let record = match last_enriched(&config.paths.export)? {
        Some(r) if r.has_cid() => Some(r),
        _ => last_enriched(&config.paths.latest)?,
    };
    let Some(record) = record else {
        println!("[INFO] no latest record; nothing to draft");
        return Ok(());
    };
    if !record.has_cid() {
        println!("[WARN] latest record has no cid; skipped");
        return Ok(());
    }
    write_draft_and_queue(config, &record, Local::now(), false)?;
    Ok(())
}

/// `cath draft daily [YYYYMMDD]`. Defaults to today.
pub fn generate_daily(config: &Config, day: Option<&str>) -> Result<()> {
    let now = Local::now();
    let day = day
        .map(str::to_string)
        .unwrap_or_else(|| now.format("%Y%m%d").to_string());
    let path = archive::daily_path(&config.paths, &day);
    if !path.exists() {
        println!("[INFO] no daily log for {}: {}", day, path.display());
        return Ok(());
    }

    let mut written = 0usize;
    for raw in jsonl::read_records(&path)? {
        let record = EnrichedRecord::from_raw(raw);
        if !record.has_cid() {
            println!("[WARN] daily record without cid skipped");
            continue;
        }
        match write_draft_and_queue(config, &record, now, true) {
            Ok(_) => written += 1,
            Err(e) => println!("[FAIL] {}: {:#}", record.cid, e),
        }
    }
    println!("[DONE] drafts={} day={}", written, day);
    Ok(())
}

/// Most recent known record for `cid`: latest snapshot, then history, then a
/// fresh merge of the cached source files.
pub fn find_record(config: &Config, cid: &str) -> Result<Option<EnrichedRecord>> {
    if let Some(rec) = last_enriched(&config.paths.latest)? {
        if rec.cid == cid {
            return Ok(Some(rec));
        }
    }

    let from_history = jsonl::read_records(&config.paths.history)?
        .into_iter()
        .rev()
        .find(|r| r.cid().as_deref() == Some(cid))
        .map(EnrichedRecord::from_raw);
    if from_history.is_some() {
        return Ok(from_history);
    }

    Ok(merge_from_cache(config, cid))
}

/// `cath draft cid <cid>`.
pub fn generate_for_cid(config: &Config, cid: &str) -> Result<()> {
    let Some(cid) = canonical_cid(cid) else {
        bail!("Invalid cid: {:?}", cid);
    };
    let Some(record) = find_record(config, &cid)? else {
        bail!("No record found for {} (latest, history, source cache)", cid);
    };
    write_draft_and_queue(config, &record, Local::now(), true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 1, 9, 0, 0).unwrap()
    }

    fn config(tmp: &TempDir) -> Config {
        let mut config = Config::default();
        let root = tmp.path();
        config.paths.latest = root.join("out/latest.jsonl");
        config.paths.history = root.join("out/history.jsonl");
        config.paths.daily_dir = root.join("out/daily");
        config.paths.items_dir = root.join("out/items");
        config.paths.export = root.join("exports/latest.jsonl");
        config.paths.drafts_dir = root.join("drafts");
        config.paths.queue_dir = root.join("queue");
        config
    }

    fn record() -> EnrichedRecord {
        EnrichedRecord {
            cid: "sweet101".into(),
            title: Some("Sweet Title 101".into()),
            date: Some("2025-11-28 10:00:00".into()),
            genres: vec!["素人".into(), "素人".into(), "美乳".into()],
            sizes: Some("T158 B88 W57 H84".into()),
            review_body: Some("Great.".into()),
            sample_images: (1..=7)
                .map(|i| format!("https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101jp-{:03}.jpg", i))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn slug_rules() {
        assert_eq!(slug("  Hello  World ").unwrap(), "Hello_World");
        assert_eq!(slug("素人 ちゃん！").unwrap(), "素人_ちゃん");
        assert_eq!(slug("a/b?c").unwrap(), "abc");
        assert_eq!(slug("").unwrap(), "untitled");
        assert_eq!(slug("!!!").unwrap(), "untitled");
        assert_eq!(slug(&"x".repeat(200)).unwrap().len(), 80);
    }

    #[test]
    fn file_name_uses_release_day() {
        assert_eq!(
            draft_file_name(&record(), now()).unwrap(),
            "20251128_sweet101_Sweet_Title_101.md"
        );
        let undated = EnrichedRecord {
            cid: "abc1".into(),
            ..Default::default()
        };
        assert_eq!(draft_file_name(&undated, now()).unwrap(), "20251201_abc1_untitled.md");
    }

    #[test]
    fn markdown_has_front_matter_and_sections() {
        let md = build_markdown(&record(), now()).unwrap();
        assert!(md.starts_with("---\n"));
        let rest = &md[4..];
        let end = rest.find("\n---\n").unwrap();
        let front: FrontMatter = serde_yaml::from_str(&rest[..end]).unwrap();
        assert_eq!(front.cid, "sweet101");
        assert_eq!(front.date, "2025-11-28");
        assert_eq!(front.tags, vec!["素人", "美乳"]);

        assert!(md.contains("# Sweet Title 101"));
        assert!(md.contains("* サイズ: T158 B88 W57 H84"));
        assert!(md.contains("* メーカー: -"));
        assert!(md.contains(&format!("{}\n\nGreat.", REVIEW_HEADING)));
        assert_eq!(md.matches("![sample").count(), 5);
    }

    #[test]
    fn missing_review_and_sizes_get_placeholders() {
        let rec = EnrichedRecord {
            cid: "abc1".into(),
            ..Default::default()
        };
        let md = build_markdown(&rec, now()).unwrap();
        assert!(md.contains(NO_REVIEW));
        assert!(md.contains("* サイズ: B-- W-- H--"));
    }

    #[test]
    fn existing_draft_is_kept_but_queue_refreshed() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let (path, written) = write_draft_and_queue(&config, &record(), now(), false).unwrap();
        assert!(written);
        std::fs::write(&path, "edited by hand").unwrap();
        std::fs::remove_file(queue_path(&config, "sweet101")).unwrap();

        let (_, written) = write_draft_and_queue(&config, &record(), now(), false).unwrap();
        assert!(!written);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "edited by hand");

        let entry: QueueEntry = serde_json::from_str(
            &std::fs::read_to_string(queue_path(&config, "sweet101")).unwrap(),
        )
        .unwrap();
        assert!(entry.ready);
        assert_eq!(entry.draft_path, path.display().to_string());
    }

    #[test]
    fn missing_cid_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = write_draft_and_queue(&config(&tmp), &EnrichedRecord::default(), now(), true)
            .unwrap_err();
        assert!(err.to_string().contains("cid"));
    }

    #[test]
    fn find_record_falls_back_to_history() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let mut old = record();
        old.title = Some("old".into());
        jsonl::append_record(&config.paths.history, &old).unwrap();
        let mut newer = record();
        newer.title = Some("newer".into());
        jsonl::append_record(&config.paths.history, &newer).unwrap();
        let other = EnrichedRecord {
            cid: "other1".into(),
            ..Default::default()
        };
        jsonl::write_snapshot(&config.paths.latest, &other).unwrap();

        let found = find_record(&config, "sweet101").unwrap().unwrap();
        assert_eq!(found.title.as_deref(), Some("newer"));
        assert!(find_record(&config, "nothing1").unwrap().is_none());
    }
}
