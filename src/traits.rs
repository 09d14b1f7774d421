//! Seams between the reconciliation core and the outside world.
//!
//! Everything that touches the network sits behind one of these traits, so
//! the merge, filter, upgrade and archive logic can be driven end to end
//! with in-memory fixtures.
//!
//! ```text
//!  RecordSource (api)    ─┐
//!  RecordSource (probe)  ─┼─▶ merge ─▶ SizeUpgrader ─▶ archive
//!  SampleSource          ─┘                ▲
//!                                  Reachability
//!  CandidateSource ─▶ select_next_unseen (automatic runs)
//! ```

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::RawRecord;

/// A per-CID metadata source (commerce API, page prober).
///
/// Implementations return an empty record when the item is simply not
/// found; `Err` is reserved for the source being unavailable.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Short label used in status lines and cache file names.
    fn name(&self) -> &str;

    async fn fetch(&self, cid: &str) -> Result<RawRecord, FetchError>;
}

/// A focused source of raw sample-image URLs.
#[async_trait]
pub trait SampleSource: Send + Sync {
    fn name(&self) -> &str;

    async fn samples(&self, cid: &str) -> Result<Vec<String>, FetchError>;
}

/// A freshest-first listing of CIDs for automatic runs.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &str;

    async fn latest_cids(&self, limit: usize) -> Result<Vec<String>, FetchError>;
}

/// Bounded existence check for a URL. Failure of any kind is `false`.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn exists(&self, url: &str) -> bool;
}

/// The full set of collaborators one pipeline run needs.
pub struct Sources {
    pub api: Box<dyn RecordSource>,
    pub probe: Box<dyn RecordSource>,
    pub samples: Box<dyn SampleSource>,
    /// Tried in order; the first non-empty listing wins.
    pub candidates: Vec<Box<dyn CandidateSource>>,
    pub reachability: Box<dyn Reachability>,
}
