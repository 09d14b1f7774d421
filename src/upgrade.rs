//! Size-upgrade resolver.
//!
//! Sample images are usually harvested as small thumbnails
//! (`<cid>js-001.jpg`) and the poster as `<cid>jm.jpg`. Larger variants live
//! next to them as `<cid>jp-001.jpg` / `<cid>jp.jpg`. For each URL the
//! resolver builds the large candidate and adopts it only if a bounded
//! reachability probe confirms it exists; otherwise the original (with query
//! and fragment stripped) is kept.
//!
//! Probes run strictly one after another.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::config::ImagesConfig;
use crate::traits::Reachability;
use crate::url_filter::{dedup_preserving_order, strip_query};

/// Reachability over HTTP: `GET` with a short timeout, 2xx/3xx counts.
pub struct HttpReachability {
    client: reqwest::Client,
}

impl HttpReachability {
    pub fn new(config: &ImagesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Reachability for HttpReachability {
    async fn exists(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                status.is_success() || status.is_redirection()
            }
            Err(e) => {
                debug!(url, error = %e, "probe failed");
                false
            }
        }
    }
}

pub struct SizeUpgrader<'a> {
    probe: &'a dyn Reachability,
    small_sample: Regex,
}

impl<'a> SizeUpgrader<'a> {
    pub fn new(probe: &'a dyn Reachability) -> Result<Self> {
        Ok(Self {
            probe,
            small_sample: Regex::new(r"/([A-Za-z0-9_]+)js-([0-9]+)\.(jpg|jpeg|webp|png)$")?,
        })
    }

    /// Upgrade every URL where a larger variant is reachable. Order is
    /// preserved; entries that end up identical collapse to one.
    pub async fn upgrade(&self, urls: &[String], cid: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(urls.len());
        for url in urls {
            let resolved = self.resolve(url, cid).await;
            if !resolved.is_empty() {
                out.push(resolved);
            }
        }
        dedup_preserving_order(out)
    }

    async fn resolve(&self, url: &str, cid: &str) -> String {
        let base = strip_query(url.trim()).to_string();
        let candidate = self.large_candidate(&base, cid);
        if candidate != base && self.probe.exists(&candidate).await {
            debug!(from = %base, to = %candidate, "upgraded sample image");
            return candidate;
        }
        base
    }

    /// The large variant of `base`, or `base` itself when no substitution
    /// applies. Pure; does no I/O.
    pub fn large_candidate(&self, base: &str, cid: &str) -> String {
        let step = self
            .small_sample
            .replace(base, "/${1}jp-${2}.${3}")
            .into_owned();
        large_poster(&step, cid).unwrap_or(step)
    }
}

/// `/<cid>jm.<ext>` → `/<cid>jp.<ext>`.
fn large_poster(url: &str, cid: &str) -> Option<String> {
    if cid.is_empty() {
        return None;
    }
    let (dir, file) = url.rsplit_once('/')?;
    let (stem, ext) = file.rsplit_once('.')?;
    if stem != format!("{}jm", cid) {
        return None;
    }
    if !matches!(ext, "jpg" | "jpeg" | "webp" | "png") {
        return None;
    }
    Some(format!("{}/{}jp.{}", dir, cid, ext))
}
