//! Merge engine: one API record + one prober record + raw samples → one
//! [`EnrichedRecord`].
//!
//! The API is authoritative for catalog metadata. The prober only fills in
//! what the API never has (review text, measurements) and, where the API is
//! silent, the performer name and label. Each rule below is applied
//! independently and in order:
//!
//! 1. start from a full copy of the API record;
//! 2. `review_body` ← first non-empty of probe `review_body | review |
//!    description`, if any;
//! 3. `sizes` ← first non-empty of probe `sizes | sizes_text`, if any;
//! 4. `name` ← probe `name`, only if the base has no performers;
//! 5. `label` ← probe `label`, only if the base has no series;
//! 6. `sample_images` ← filter(API samples if non-empty, else raw samples).
//!
//! No I/O happens here. Size upgrades are the caller's job.

use serde_json::Value;

use crate::models::{EnrichedRecord, RawRecord};
use crate::url_filter::SampleFilter;

const REVIEW_KEYS: &[&str] = &["review_body", "review", "description"];
const SIZE_KEYS: &[&str] = &["sizes", "sizes_text"];

/// Merge with an arbitrary sample filter `filter(urls, cid)`.
///
/// The CID comes from the API record, or from the prober when the API
/// record has none. A result with an empty `cid` is returned as-is; later
/// stages discard it.
pub fn merge_with<F>(
    api: &RawRecord,
    probe: &RawRecord,
    raw_samples: &[String],
    filter: F,
) -> EnrichedRecord
where
    F: Fn(&[String], &str) -> Vec<String>,
{
    let mut base = api.clone();

    if let Some(review) = probe.first_str(REVIEW_KEYS) {
        base.insert("review_body", Value::String(review.to_string()));
    }

    if let Some(sizes) = probe.first_str(SIZE_KEYS) {
        base.insert("sizes", Value::String(sizes.to_string()));
    }

    if let Some(name) = probe.str_field("name") {
        if !base.is_truthy("performers") {
            base.insert("name", Value::String(name.to_string()));
        }
    }

    if let Some(label) = probe.str_field("label") {
        if !base.is_truthy("series") {
            base.insert("label", Value::String(label.to_string()));
        }
    }

    let cid = api.cid().or_else(|| probe.cid()).unwrap_or_default();
    if !cid.is_empty() {
        base.insert("cid", Value::String(cid.clone()));
    }

    let api_samples = api.str_list("sample_images");
    let source = if api_samples.is_empty() {
        raw_samples
    } else {
        api_samples.as_slice()
    };
    let samples = filter(source, &cid);
    base.insert(
        "sample_images",
        Value::Array(samples.into_iter().map(Value::String).collect()),
    );

    EnrichedRecord::from_raw(base)
}

/// Merge using a configured [`SampleFilter`].
pub fn merge(
    api: &RawRecord,
    probe: &RawRecord,
    raw_samples: &[String],
    filter: &SampleFilter,
) -> EnrichedRecord {
    merge_with(api, probe, raw_samples, |urls, cid| filter.filter(urls, cid))
}
