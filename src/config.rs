//! TOML configuration.
//!
//! Every section is optional; missing keys fall back to the defaults below,
//! which mirror the directory layout the blog has always used
//! (`data_getter/out/...`, `content/...`, `publish_queue/`).
//!
//! ```toml
//! [paths]
//! history = "./data_getter/out/history.jsonl"
//! daily_dir = "./data_getter/out/daily"
//!
//! [browser]
//! endpoint = "http://localhost:3000"
//!
//! [images]
//! fallback_count = 10
//! ```
//!
//! API credentials are never read from the file. See
//! [`crate::source_api::ApiCredentials::from_env`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub images: ImagesConfig,
}

/// Locations of every file the pipeline reads or appends to.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_latest")]
    pub latest: PathBuf,
    #[serde(default = "default_history")]
    pub history: PathBuf,
    #[serde(default = "default_daily_dir")]
    pub daily_dir: PathBuf,
    #[serde(default = "default_processed")]
    pub processed: PathBuf,
    #[serde(default = "default_items_dir")]
    pub items_dir: PathBuf,
    #[serde(default = "default_export")]
    pub export: PathBuf,
    #[serde(default = "default_drafts_dir")]
    pub drafts_dir: PathBuf,
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,
    #[serde(default = "default_published_dir")]
    pub published_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            latest: default_latest(),
            history: default_history(),
            daily_dir: default_daily_dir(),
            processed: default_processed(),
            items_dir: default_items_dir(),
            export: default_export(),
            drafts_dir: default_drafts_dir(),
            queue_dir: default_queue_dir(),
            published_dir: default_published_dir(),
        }
    }
}

fn default_latest() -> PathBuf {
    PathBuf::from("./data_getter/out/videoc_latest_enriched.jsonl")
}
fn default_history() -> PathBuf {
    PathBuf::from("./data_getter/out/history.jsonl")
}
fn default_daily_dir() -> PathBuf {
    PathBuf::from("./data_getter/out/daily")
}
fn default_processed() -> PathBuf {
    PathBuf::from("./data_getter/out/processed_cids.txt")
}
fn default_items_dir() -> PathBuf {
    PathBuf::from("./data_getter/out/items")
}
fn default_export() -> PathBuf {
    PathBuf::from("./content/exports/latest.jsonl")
}
fn default_drafts_dir() -> PathBuf {
    PathBuf::from("./content/drafts")
}
fn default_queue_dir() -> PathBuf {
    PathBuf::from("./publish_queue")
}
fn default_published_dir() -> PathBuf {
    PathBuf::from("./content/published")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/blog.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_hits")]
    pub hits: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_listing_limit")]
    pub listing_limit: usize,
    #[serde(default = "default_listing_url")]
    pub listing_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_api_endpoint(),
            timeout_secs: default_api_timeout(),
            hits: default_hits(),
            max_pages: default_max_pages(),
            listing_limit: default_listing_limit(),
            listing_url: default_listing_url(),
        }
    }
}

fn default_api_endpoint() -> String {
    "https://api.dmm.com/affiliate/v3/ItemList".to_string()
}
fn default_api_timeout() -> u64 {
    25
}
fn default_hits() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    5
}
fn default_listing_limit() -> usize {
    60
}
fn default_listing_url() -> String {
    "https://www.dmm.co.jp/digital/amateur/-/list/=/sort=date/".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// Base URL of a Browserless-compatible service exposing `POST /content`.
    #[serde(default = "default_browser_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_detail_url_template")]
    pub detail_url_template: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_samples_timeout")]
    pub samples_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: default_browser_endpoint(),
            detail_url_template: default_detail_url_template(),
            probe_timeout_secs: default_probe_timeout(),
            samples_timeout_secs: default_samples_timeout(),
        }
    }
}

impl BrowserConfig {
    /// Detail page URL for a CID.
    pub fn detail_url(&self, cid: &str) -> String {
        self.detail_url_template.replace("{cid}", cid)
    }
}

fn default_browser_endpoint() -> String {
    "http://localhost:3000".to_string()
}
fn default_detail_url_template() -> String {
    "https://video.dmm.co.jp/amateur/content/?id={cid}".to_string()
}
fn default_probe_timeout() -> u64 {
    90
}
fn default_samples_timeout() -> u64 {
    180
}

/// Sample-image policy shared by the URL filter, the size upgrader and the
/// sample fetcher.
#[derive(Debug, Deserialize, Clone)]
pub struct ImagesConfig {
    #[serde(default = "default_allow_hosts")]
    pub allow_hosts: Vec<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_fallback_template")]
    pub fallback_template: String,
    #[serde(default = "default_fallback_count")]
    pub fallback_count: usize,
    #[serde(default = "default_image_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            allow_hosts: default_allow_hosts(),
            extensions: default_extensions(),
            fallback_template: default_fallback_template(),
            fallback_count: default_fallback_count(),
            probe_timeout_secs: default_image_probe_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_allow_hosts() -> Vec<String> {
    vec![
        "pics.dmm.co.jp".to_string(),
        "awsimgsrc.dmm.co.jp".to_string(),
    ]
}
fn default_extensions() -> Vec<String> {
    vec![
        ".jpg".to_string(),
        ".jpeg".to_string(),
        ".webp".to_string(),
        ".png".to_string(),
    ]
}
fn default_fallback_template() -> String {
    "https://awsimgsrc.dmm.co.jp/pics_dig/digital/amateur/{cid}/{cid}js-{index}.jpg".to_string()
}
fn default_fallback_count() -> usize {
    10
}
fn default_image_probe_timeout() -> u64 {
    8
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0 Safari/537.36"
        .to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let images = &config.images;
    if images.allow_hosts.iter().all(|h| h.trim().is_empty()) {
        bail!("images.allow_hosts must name at least one host");
    }
    if images.extensions.is_empty() {
        bail!("images.extensions must not be empty");
    }
    if images.fallback_count == 0 {
        bail!("images.fallback_count must be >= 1");
    }
    if !images.fallback_template.contains("{cid}") {
        bail!("images.fallback_template must contain {{cid}}");
    }
    if !config.browser.detail_url_template.contains("{cid}") {
        bail!("browser.detail_url_template must contain {{cid}}");
    }
    if config.api.hits == 0 {
        bail!("api.hits must be >= 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.images.fallback_count, 10);
        assert_eq!(config.images.allow_hosts.len(), 2);
        assert_eq!(config.api.timeout_secs, 25);
        assert!(config.paths.history.ends_with("history.jsonl"));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            history = "/tmp/h.jsonl"

            [images]
            fallback_count = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.history, PathBuf::from("/tmp/h.jsonl"));
        assert!(config.paths.daily_dir.ends_with("daily"));
        assert_eq!(config.images.fallback_count, 4);
        assert_eq!(config.images.extensions.len(), 4);
    }

    #[test]
    fn rejects_template_without_cid() {
        let config: Config = toml::from_str(
            r#"
            [images]
            fallback_template = "https://pics.dmm.co.jp/x-{index}.jpg"
            "#,
        )
        .unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("fallback_template"));
    }

    #[test]
    fn detail_url_substitutes_cid() {
        let browser = BrowserConfig::default();
        assert_eq!(
            browser.detail_url("sweet101"),
            "https://video.dmm.co.jp/amateur/content/?id=sweet101"
        );
    }
}
