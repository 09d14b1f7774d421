//! Sample-image URL filter.
//!
//! Keeps only URLs that point at an image of *this* CID on one of the
//! allowed image hosts. Scraped pages routinely leak thumbnails of related
//! items, so scoping by CID is the main job here.
//!
//! A URL survives when, after stripping query and fragment:
//!
//! - its host is an allowed host (or a subdomain of one),
//! - its path ends in an allowed extension,
//! - its path either contains `/amateur/<cid>/` or its file name is
//!   `<cid>js-<n>.<ext>` / `<cid>jp-<n>.<ext>`.
//!
//! When nothing survives, a fixed sequence built from
//! `images.fallback_template` is returned instead.

use std::collections::HashSet;

use url::Url;

use crate::config::ImagesConfig;

/// Drop the query string and fragment.
pub fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Order-preserving dedup.
pub fn dedup_preserving_order<I>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct SampleFilter {
    allow_hosts: Vec<String>,
    extensions: Vec<String>,
    fallback_template: String,
    fallback_count: usize,
}

impl SampleFilter {
    pub fn new(config: &ImagesConfig) -> Self {
        Self {
            allow_hosts: config
                .allow_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            fallback_template: config.fallback_template.clone(),
            fallback_count: config.fallback_count,
        }
    }

    /// Filter `urls` for `cid`, falling back to the synthesized sequence
    /// when nothing passes. An empty `cid` yields an empty list: without a
    /// scope nothing can pass and no fallback can be built.
    pub fn filter(&self, urls: &[String], cid: &str) -> Vec<String> {
        if cid.trim().is_empty() {
            return Vec::new();
        }
        let kept = self.retain_matching(urls, cid);
        if kept.is_empty() {
            return self.fallback(cid);
        }
        kept
    }

    /// Same as [`filter`](Self::filter) without the fallback.
    pub fn retain_matching(&self, urls: &[String], cid: &str) -> Vec<String> {
        let cid = cid.trim().to_ascii_lowercase();
        if cid.is_empty() {
            return Vec::new();
        }
        dedup_preserving_order(
            urls.iter()
                .map(|u| strip_query(u.trim()))
                .filter(|u| !u.is_empty())
                .filter(|u| self.accepts(u, &cid))
                .map(str::to_string),
        )
    }

    /// The documented fallback: `fallback_count` URLs numbered from 1,
    /// zero-padded to three digits.
    pub fn fallback(&self, cid: &str) -> Vec<String> {
        let cid = cid.trim().to_ascii_lowercase();
        dedup_preserving_order((1..=self.fallback_count).map(|i| {
            self.fallback_template
                .replace("{cid}", &cid)
                .replace("{index}", &format!("{:03}", i))
        }))
    }

    /// Whether `url` is an image on an allowed host, regardless of CID.
    pub fn is_allowed_image(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(strip_query(url.trim())) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let path = parsed.path().to_ascii_lowercase();
        self.host_allowed(&host.to_ascii_lowercase())
            && self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }

    fn accepts(&self, url: &str, cid: &str) -> bool {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return false,
        };
        let host = match parsed.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return false,
        };
        if !self.host_allowed(&host) {
            return false;
        }

        let path = parsed.path().to_ascii_lowercase();
        if !self.extensions.iter().any(|ext| path.ends_with(ext.as_str())) {
            return false;
        }

        path.contains(&format!("/amateur/{}/", cid)) || self.is_numbered_file(&path, cid)
    }

    fn host_allowed(&self, host: &str) -> bool {
        self.allow_hosts
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
    }

    /// `<cid>js-<digits>.<ext>` or `<cid>jp-<digits>.<ext>` as the last path
    /// segment.
    fn is_numbered_file(&self, path: &str, cid: &str) -> bool {
        let file = path.rsplit('/').next().unwrap_or("");
        let Some((stem, _ext)) = file.rsplit_once('.') else {
            return false;
        };
        let Some(rest) = stem.strip_prefix(cid) else {
            return false;
        };
        let Some(index) = rest
            .strip_prefix("js-")
            .or_else(|| rest.strip_prefix("jp-"))
        else {
            return false;
        };
        !index.is_empty() && index.chars().all(|c| c.is_ascii_digit())
    }
}
