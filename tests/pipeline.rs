//! End-to-end runs of the pipeline against in-memory sources.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use catalog_harness::config::Config;
use catalog_harness::error::FetchError;
use catalog_harness::models::RawRecord;
use catalog_harness::pipeline::{run_with_sources, select_auto};
use catalog_harness::processed::ProcessedSet;
use catalog_harness::traits::{CandidateSource, Reachability, RecordSource, SampleSource, Sources};

struct FixedSource {
    name: &'static str,
    records: HashMap<String, serde_json::Value>,
}

#[async_trait]
impl RecordSource for FixedSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, cid: &str) -> Result<RawRecord, FetchError> {
        Ok(self
            .records
            .get(cid)
            .cloned()
            .map(RawRecord::from_value)
            .unwrap_or_default())
    }
}

struct DownSource;

#[async_trait]
impl RecordSource for DownSource {
    fn name(&self) -> &str {
        "down"
    }

    async fn fetch(&self, cid: &str) -> Result<RawRecord, FetchError> {
        Err(FetchError::Timeout {
            what: format!("probe {}", cid),
            secs: 90,
        })
    }
}

struct CountingSamples {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SampleSource for CountingSamples {
    fn name(&self) -> &str {
        "samples"
    }

    async fn samples(&self, _cid: &str) -> Result<Vec<String>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

struct Listing(Vec<&'static str>);

#[async_trait]
impl CandidateSource for Listing {
    fn name(&self) -> &str {
        "listing"
    }

    async fn latest_cids(&self, limit: usize) -> Result<Vec<String>, FetchError> {
        Ok(self.0.iter().take(limit).map(|s| s.to_string()).collect())
    }
}

struct Nothing;

#[async_trait]
impl Reachability for Nothing {
    async fn exists(&self, _url: &str) -> bool {
        false
    }
}

fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.latest = root.join("out/latest.jsonl");
    config.paths.history = root.join("out/history.jsonl");
    config.paths.daily_dir = root.join("out/daily");
    config.paths.processed = root.join("out/processed_cids.txt");
    config.paths.items_dir = root.join("out/items");
    config.paths.export = root.join("exports/latest.jsonl");
    config
}

fn sources(probe: Box<dyn RecordSource>, calls: Arc<AtomicUsize>) -> Sources {
    let api = FixedSource {
        name: "api",
        records: HashMap::from([
            ("sweet101".to_string(), json!({"cid": "sweet101", "title": "T"})),
            ("bini512".to_string(), json!({"cid": "bini512", "title": "B"})),
        ]),
    };
    Sources {
        api: Box::new(api),
        probe,
        samples: Box::new(CountingSamples { calls }),
        candidates: vec![Box::new(Listing(vec!["sweet101", "bini512", "new777"]))],
        reachability: Box::new(Nothing),
    }
}

fn sweet_probe() -> Box<dyn RecordSource> {
    Box::new(FixedSource {
        name: "probe",
        records: HashMap::from([(
            "sweet101".to_string(),
            json!({
                "cid": "sweet101",
                "sizes": "B88 W57 H84",
                "review_body": "great",
                "sample_images": [
                    "https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101jp-001.jpg"
                ]
            }),
        )]),
    })
}

fn lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}

fn daily_lines(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| lines(&e.path())).sum())
        .unwrap_or(0)
}

#[tokio::test]
async fn full_pipeline_merges_both_sources() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let sources = sources(sweet_probe(), calls.clone());

    let summary = run_with_sources(&config, &sources, &["sweet101".to_string()])
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);

    let rec = &summary.records[0];
    assert_eq!(rec.cid, "sweet101");
    assert_eq!(rec.title.as_deref(), Some("T"));
    assert_eq!(rec.sizes.as_deref(), Some("B88 W57 H84"));
    assert_eq!(rec.review_body.as_deref(), Some("great"));
    assert_eq!(
        rec.sample_images,
        vec!["https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101jp-001.jpg"]
    );
    assert!(rec.ingested_at.is_some());

    // The prober already had a usable sample, so the focused fetch is skipped.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(config.paths.items_dir.join("sweet101_api.json").exists());
    assert!(config.paths.items_dir.join("sweet101_probe.json").exists());
    assert!(ProcessedSet::load(&config.paths.processed)
        .unwrap()
        .contains("sweet101"));
}

#[tokio::test]
async fn repeated_cid_follows_history_and_daily_policies() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let sources = sources(sweet_probe(), Arc::new(AtomicUsize::new(0)));

    let cids: Vec<String> = ["sweet101", "bini512", "sweet101"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let summary = run_with_sources(&config, &sources, &cids).await.unwrap();
    assert_eq!(summary.processed, 3);

    assert_eq!(lines(&config.paths.history), 3);
    assert_eq!(daily_lines(&config.paths.daily_dir), 2);

    // Same CID twice in a row: nothing new anywhere.
    run_with_sources(&config, &sources, &["sweet101".to_string()])
        .await
        .unwrap();
    assert_eq!(lines(&config.paths.history), 3);
    assert_eq!(daily_lines(&config.paths.daily_dir), 2);
    assert_eq!(lines(&config.paths.processed), 2);
}

#[tokio::test]
async fn unavailable_probe_still_archives_api_record() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let sources = sources(Box::new(DownSource), calls.clone());

    let summary = run_with_sources(&config, &sources, &["bini512".to_string()])
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    let rec = &summary.records[0];
    assert!(rec.sizes.is_none());
    assert!(rec.review_body.is_none());
    // Nothing usable from either source: the focused fetch ran, then the
    // fallback sequence was used.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(rec.sample_images.len(), 10);
}

#[tokio::test]
async fn unknown_cid_fails_alone() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let sources = sources(Box::new(DownSource), Arc::new(AtomicUsize::new(0)));

    let cids = vec!["ghost1".to_string(), "bini512".to_string()];
    let summary = run_with_sources(&config, &sources, &cids).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(lines(&config.paths.history), 1);

    // The API answered without the item, so automatic runs move past it.
    assert!(ProcessedSet::load(&config.paths.processed)
        .unwrap()
        .contains("ghost1"));
}

#[tokio::test]
async fn outage_leaves_cid_open_for_retry() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let sources = Sources {
        api: Box::new(DownSource),
        probe: Box::new(DownSource),
        samples: Box::new(CountingSamples {
            calls: Arc::new(AtomicUsize::new(0)),
        }),
        candidates: vec![Box::new(Listing(vec!["ghost1", "bini512"]))],
        reachability: Box::new(Nothing),
    };

    let summary = run_with_sources(&config, &sources, &["ghost1".to_string()])
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert!(!ProcessedSet::load(&config.paths.processed)
        .unwrap()
        .contains("ghost1"));
    assert_eq!(
        select_auto(&config, &sources, 1).await.unwrap().as_deref(),
        Some("ghost1")
    );
}

#[tokio::test]
async fn automatic_selection_skips_processed() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let sources = sources(sweet_probe(), Arc::new(AtomicUsize::new(0)));

    assert_eq!(
        select_auto(&config, &sources, 1).await.unwrap().as_deref(),
        Some("sweet101")
    );

    run_with_sources(&config, &sources, &["sweet101".to_string()])
        .await
        .unwrap();
    assert_eq!(
        select_auto(&config, &sources, 1).await.unwrap().as_deref(),
        Some("bini512")
    );
    assert_eq!(
        select_auto(&config, &sources, 2).await.unwrap().as_deref(),
        Some("new777")
    );
    // Past the end: the last unseen candidate.
    assert_eq!(
        select_auto(&config, &sources, 9).await.unwrap().as_deref(),
        Some("new777")
    );
}
