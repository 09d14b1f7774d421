//! Run orchestration.
//!
//! One invocation processes a list of CIDs strictly one after another:
//!
//! ```text
//! api.fetch ─▶ probe.fetch ─▶ samples (only if needed) ─▶ merge
//!     ─▶ size upgrade ─▶ archive ─▶ processed set
//! ```
//!
//! A source that fails or times out contributes an empty record and the run
//! carries on. A persistence failure aborts only the CID at hand; the run
//! moves on to the next one and reports it in the `[DONE]` summary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use crate::archive;
use crate::config::Config;
use crate::error::RecordError;
use crate::merge::merge;
use crate::models::{canonical_cid, EnrichedRecord, RawRecord};
use crate::processed::{select_next_unseen, ProcessedSet};
use crate::source_api::{ApiFetcher, HtmlListing};
use crate::source_probe::PageProber;
use crate::source_samples::SampleFetcher;
use crate::traits::{CandidateSource, RecordSource, Sources};
use crate::upgrade::{HttpReachability, SizeUpgrader};
use crate::url_filter::SampleFilter;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit CIDs; entries may themselves be comma-separated.
    pub cids: Vec<String>,
    /// File with one CID per line.
    pub file: Option<PathBuf>,
    /// Pick the next unseen CID from the latest listing. Implied when no
    /// explicit CIDs are given.
    pub auto: bool,
    /// Which unseen candidate to pick (1-indexed).
    pub auto_index: usize,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
    pub records: Vec<EnrichedRecord>,
}

/// Wire up the network-backed sources from configuration.
pub fn build_sources(config: &Config) -> Result<Sources> {
    Ok(Sources {
        api: Box::new(ApiFetcher::new(&config.api)?),
        probe: Box::new(PageProber::new(config)?),
        samples: Box::new(SampleFetcher::new(config)?),
        candidates: vec![
            Box::new(ApiFetcher::new(&config.api)?) as Box<dyn CandidateSource>,
            Box::new(HtmlListing::new(&config.api, &config.images.user_agent)?),
        ],
        reachability: Box::new(HttpReachability::new(&config.images)?),
    })
}

/// Explicit CIDs from `--cids` and `--file`, canonicalized and deduplicated
/// in first-seen order. Entries that are not valid CIDs are reported and
/// dropped.
pub fn resolve_explicit_cids(cids: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let mut raw: Vec<String> = cids
        .iter()
        .flat_map(|c| c.split(','))
        .map(str::to_string)
        .collect();

    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CID list: {}", path.display()))?;
        raw.extend(text.lines().map(str::to_string));
    }

    let mut out: Vec<String> = Vec::new();
    for entry in raw {
        if entry.trim().is_empty() {
            continue;
        }
        match canonical_cid(&entry) {
            Some(cid) if !out.contains(&cid) => out.push(cid),
            Some(_) => {}
            None => println!("[WARN] ignoring invalid cid: {:?}", entry.trim()),
        }
    }
    Ok(out)
}

/// Next unseen CID from the first candidate source that lists anything.
pub async fn select_auto(config: &Config, sources: &Sources, index: usize) -> Result<Option<String>> {
    let limit = config.api.listing_limit.max(index);
    let mut candidates = Vec::new();
    for source in &sources.candidates {
        match source.latest_cids(limit).await {
            Ok(list) if !list.is_empty() => {
                candidates = list;
                break;
            }
            Ok(_) => println!("[INFO] {} listing returned no candidates", source.name()),
            Err(e) => {
                warn!(source = source.name(), error = %e, "candidate listing failed");
                println!("[WARN] {} listing unavailable: {}", source.name(), e);
            }
        }
    }

    let processed = ProcessedSet::load(&config.paths.processed)?;
    Ok(select_next_unseen(&candidates, processed.as_set(), index))
}

/// `cath run`.
pub async fn run_pipeline(config: &Config, opts: &RunOptions) -> Result<()> {
    let sources = build_sources(config)?;

    let explicit = !opts.cids.is_empty() || opts.file.is_some();
    let cids = if explicit && !opts.auto {
        resolve_explicit_cids(&opts.cids, opts.file.as_deref())?
    } else {
        match select_auto(config, &sources, opts.auto_index).await? {
            Some(cid) => vec![cid],
            None => {
                println!("[INFO] no unseen candidates; nothing to do");
                return Ok(());
            }
        }
    };

    if cids.is_empty() {
        println!("[INFO] no cids given; nothing to do");
        return Ok(());
    }

    let summary = run_with_sources(config, &sources, &cids).await?;
    println!(
        "[DONE] processed={} failed={} history={}",
        summary.processed,
        summary.failed,
        config.paths.history.display()
    );
    Ok(())
}

/// Process `cids` in order against the given sources.
pub async fn run_with_sources(
    config: &Config,
    sources: &Sources,
    cids: &[String],
) -> Result<RunSummary> {
    let filter = SampleFilter::new(&config.images);
    let upgrader = SizeUpgrader::new(sources.reachability.as_ref())?;
    let mut processed = ProcessedSet::load(&config.paths.processed)?;
    let mut summary = RunSummary::default();

    for cid in cids {
        println!("[RUN] CID={}", cid);
        match process_cid(config, sources, &filter, &upgrader, &mut processed, cid).await {
            Ok(record) => {
                println!(
                    "[OK] merged: {} images={} review_len={}",
                    record.cid,
                    record.sample_images.len(),
                    record.review_body.as_deref().map_or(0, |r| r.chars().count())
                );
                summary.processed += 1;
                summary.records.push(record);
            }
            Err(e) => {
                warn!(cid = %cid, error = %e, "cid failed");
                println!("[FAIL] {}: {:#}", cid, e);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

async fn process_cid(
    config: &Config,
    sources: &Sources,
    filter: &SampleFilter,
    upgrader: &SizeUpgrader<'_>,
    processed: &mut ProcessedSet,
    cid: &str,
) -> Result<EnrichedRecord> {
    let items_dir = &config.paths.items_dir;

    let (api, api_answered) = fetch_or_empty(sources.api.as_ref(), cid).await;
    write_cache(items_dir, cid, "api", &api.clone().into_value());

    let (probe, _) = fetch_or_empty(sources.probe.as_ref(), cid).await;
    write_cache(items_dir, cid, "probe", &probe.clone().into_value());

    let mut raw_samples = probe.str_list("sample_images");
    let needs_samples = api.str_list("sample_images").is_empty()
        && filter.retain_matching(&raw_samples, cid).is_empty();
    if needs_samples {
        match sources.samples.samples(cid).await {
            Ok(found) => {
                write_cache(
                    items_dir,
                    cid,
                    "samples",
                    &serde_json::json!({ "cid": cid, "sample_images": found }),
                );
                if !found.is_empty() {
                    raw_samples = found;
                }
            }
            Err(e) => {
                warn!(cid, source = sources.samples.name(), error = %e, "sample fetch failed");
                println!("[WARN] {} unavailable for {}: {}", sources.samples.name(), cid, e);
            }
        }
    }

    let mut record = merge(&api, &probe, &raw_samples, filter);
    if !record.has_cid() {
        // The API answered without the item: it is gone, so automatic runs
        // must not pick it again. Outages leave it open for a retry.
        if api_answered {
            processed.mark(cid)?;
        }
        return Err(RecordError::MissingCid { stage: "merge" }.into());
    }

    record.sample_images = upgrader.upgrade(&record.sample_images, cid).await;
    if let Some(poster) = record.poster_url.take() {
        record.poster_url = upgrader.upgrade(&[poster], cid).await.into_iter().next();
    }

    let (record, outcome) = archive::archive(&config.paths, &record)?;
    archive::print_outcome(&record.cid, &outcome);

    processed.mark(&record.cid)?;
    Ok(record)
}

/// The source's record, or an empty one when it failed. The flag tells
/// whether the source actually answered.
async fn fetch_or_empty(source: &dyn RecordSource, cid: &str) -> (RawRecord, bool) {
    match source.fetch(cid).await {
        Ok(rec) => (rec, true),
        Err(e) => {
            warn!(cid, source = source.name(), error = %e, "source unavailable");
            println!("[WARN] {} unavailable for {}: {}", source.name(), cid, e);
            (RawRecord::new(), false)
        }
    }
}

fn cache_path(items_dir: &Path, cid: &str, kind: &str) -> PathBuf {
    items_dir.join(format!("{}_{}.json", cid, kind))
}

/// Best-effort write of one source's raw output.
fn write_cache(items_dir: &Path, cid: &str, kind: &str, value: &Value) {
    let path = cache_path(items_dir, cid, kind);
    if let Err(e) = try_write_cache(&path, value) {
        warn!(path = %path.display(), error = %e, "failed to write source cache");
    }
}

fn try_write_cache(path: &Path, value: &Value) -> Result<()> {
    crate::jsonl::ensure_parent(path)?;
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Cached raw output of one source, if present and parseable.
pub fn load_cached(items_dir: &Path, cid: &str, kind: &str) -> Option<RawRecord> {
    let path = cache_path(items_dir, cid, kind);
    let text = std::fs::read_to_string(&path).ok()?;
    let rec = RawRecord::parse(&text);
    if rec.is_none() {
        warn!(path = %path.display(), "ignoring unparseable source cache");
    }
    rec
}

/// Re-run the merge over the cached source files of `cid`. `None` when
/// neither the API nor the probe cache exists.
pub fn merge_from_cache(config: &Config, cid: &str) -> Option<EnrichedRecord> {
    let dir = &config.paths.items_dir;
    let api = load_cached(dir, cid, "api");
    let probe = load_cached(dir, cid, "probe");
    if api.is_none() && probe.is_none() {
        return None;
    }
    let api = api.unwrap_or_default();
    let probe = probe.unwrap_or_default();

    let mut raw_samples = probe.str_list("sample_images");
    if raw_samples.is_empty() {
        if let Some(samples) = load_cached(dir, cid, "samples") {
            raw_samples = samples.str_list("sample_images");
        }
    }

    let filter = SampleFilter::new(&config.images);
    let mut record = merge(&api, &probe, &raw_samples, &filter);
    if !record.has_cid() {
        record.cid = cid.to_string();
    }
    Some(record)
}
