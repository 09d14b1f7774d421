//! Offline inspection commands: `filter`, `merge`, `select`.
//!
//! `filter` and `merge` run the URL Filter and Merge Engine over arguments
//! and fixture files, so their behavior can be checked without any network
//! access. `select` prints which CID an automatic run would pick.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::config::Config;
use crate::merge::merge;
use crate::models::{canonical_cid, EnrichedRecord, RawRecord};
use crate::pipeline::{build_sources, select_auto};
use crate::url_filter::SampleFilter;

/// `cath filter <cid> [url..]`.
pub fn run_filter(config: &Config, cid: &str, urls: &[String]) -> Result<Vec<String>> {
    let Some(cid) = canonical_cid(cid) else {
        bail!("Invalid cid: {:?}", cid);
    };
    let filter = SampleFilter::new(&config.images);
    let kept = filter.filter(urls, &cid);
    for url in &kept {
        println!("{}", url);
    }
    Ok(kept)
}

fn read_fixture(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// A samples fixture is either a bare array of URLs or an object with a
/// `sample_images` array.
fn sample_urls(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        other => RawRecord::from_value(other).str_list("sample_images"),
    }
}

/// Merge fixture files into one enriched record.
pub fn merge_files(
    config: &Config,
    api: Option<&Path>,
    probe: Option<&Path>,
    samples: Option<&Path>,
) -> Result<EnrichedRecord> {
    let api = match api {
        Some(p) => RawRecord::from_value(read_fixture(p)?),
        None => RawRecord::new(),
    };
    let probe = match probe {
        Some(p) => RawRecord::from_value(read_fixture(p)?),
        None => RawRecord::new(),
    };
    let raw_samples = match samples {
        Some(p) => sample_urls(read_fixture(p)?),
        None => probe.str_list("sample_images"),
    };
    Ok(merge(&api, &probe, &raw_samples, &SampleFilter::new(&config.images)))
}

/// `cath merge`.
pub fn run_merge(
    config: &Config,
    api: Option<&Path>,
    probe: Option<&Path>,
    samples: Option<&Path>,
) -> Result<()> {
    let record = merge_files(config, api, probe, samples)?;
    if !record.has_cid() {
        println!("[WARN] merged record has no cid");
    }
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// `cath select`.
pub async fn run_select(config: &Config, index: usize) -> Result<()> {
    let sources = build_sources(config)?;
    match select_auto(config, &sources, index).await? {
        Some(cid) => println!("{}", cid),
        None => println!("[INFO] no unseen candidates"),
    }
    Ok(())
}
