//! Focused sample-image fetcher.
//!
//! A second, narrower pass over the detail page for when the prober's
//! harvest contains nothing the URL filter keeps. Only small sample images
//! of this CID qualify (`/digital/amateur/<cid>/<cid>js-NNN.<ext>`); posters
//! and `jp-` variants are left to the size upgrader.
//!
//! When the page lists none, the `og:image` directory is used to guess
//! `<cid>js-001.jpg` .. `<cid>js-010.jpg`, keeping only the guesses a
//! reachability probe confirms.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::browser::BrowserClient;
use crate::config::{BrowserConfig, Config};
use crate::error::FetchError;
use crate::traits::{Reachability, SampleSource};
use crate::upgrade::HttpReachability;
use crate::url_filter::{strip_query, SampleFilter};

const GUESS_COUNT: usize = 10;

/// Small sample images of `cid` linked or embedded in `html`, sorted.
pub fn collect_js_samples(html: &str, cid: &str, images: &SampleFilter) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("img[src], a[href]")
        .map_err(|e| anyhow!("invalid selector: {:?}", e))?;
    let file = Regex::new(&format!(
        r"(?i)/{}js-[0-9]+\.(jpg|jpeg|webp|png)$",
        regex::escape(cid)
    ))?;
    let dir = format!("/digital/amateur/{}/", cid.to_ascii_lowercase());

    let mut found = BTreeSet::new();
    for el in doc.select(&sel) {
        let attrs = el.value();
        let Some(raw) = attrs.attr("src").or_else(|| attrs.attr("href")) else {
            continue;
        };
        let url = strip_query(raw.trim());
        let url = if url.starts_with("//") {
            format!("https:{}", url)
        } else {
            url.to_string()
        };
        if !images.is_allowed_image(&url) {
            continue;
        }
        if url.to_ascii_lowercase().contains(&dir) && file.is_match(&url) {
            found.insert(url);
        }
    }
    Ok(found.into_iter().collect())
}

/// Guessed sample URLs next to the page's `og:image`, if that image lives
/// in this CID's directory.
pub fn og_candidates(html: &str, cid: &str) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"meta[property="og:image"]"#)
        .map_err(|e| anyhow!("invalid selector: {:?}", e))?;
    let Some(og) = doc
        .select(&sel)
        .next()
        .and_then(|m| m.value().attr("content"))
    else {
        return Ok(Vec::new());
    };
    let og = strip_query(og.trim());

    let dir_re = Regex::new(r"/digital/amateur/([^/]+)/")?;
    let Some(owner) = dir_re.captures(og).map(|c| c[1].to_ascii_lowercase()) else {
        return Ok(Vec::new());
    };
    if owner != cid.to_ascii_lowercase() {
        return Ok(Vec::new());
    }
    let Some((base_dir, _)) = og.rsplit_once('/') else {
        return Ok(Vec::new());
    };
    Ok((1..=GUESS_COUNT)
        .map(|i| format!("{}/{}js-{:03}.jpg", base_dir, cid, i))
        .collect())
}

pub struct SampleFetcher {
    browser: BrowserClient,
    browser_config: BrowserConfig,
    images: SampleFilter,
    probe: Box<dyn Reachability>,
    timeout: Duration,
}

impl SampleFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.browser.samples_timeout_secs);
        Ok(Self {
            browser: BrowserClient::new(&config.browser, &config.images.user_agent, timeout)?,
            browser_config: config.browser.clone(),
            images: SampleFilter::new(&config.images),
            probe: Box::new(HttpReachability::new(&config.images)?),
            timeout,
        })
    }
}

#[async_trait]
impl SampleSource for SampleFetcher {
    fn name(&self) -> &str {
        "samples"
    }

    async fn samples(&self, cid: &str) -> Result<Vec<String>, FetchError> {
        let url = self.browser_config.detail_url(cid);
        let html = tokio::time::timeout(self.timeout, self.browser.content(&url))
            .await
            .map_err(|_| FetchError::Timeout {
                what: format!("samples {}", cid),
                secs: self.timeout.as_secs(),
            })??;

        let found = collect_js_samples(&html, cid, &self.images)
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        if !found.is_empty() {
            debug!(cid, count = found.len(), "samples from page");
            return Ok(found);
        }

        let guesses = og_candidates(&html, cid).map_err(|e| FetchError::Decode(e.to_string()))?;
        let mut confirmed = Vec::new();
        for guess in guesses {
            if self.probe.exists(&guess).await {
                confirmed.push(guess);
            }
        }
        debug!(cid, count = confirmed.len(), "samples derived from og:image");
        Ok(confirmed)
    }
}
