//! Client for a Browserless-compatible rendering service.
//!
//! `POST {endpoint}/content` renders a page in headless Chromium and returns
//! the final HTML. The catalog site gates detail pages behind an age check,
//! so every request pre-sets the two cookies that mark it as passed and
//! sends the site root as `Referer`.

use std::time::Duration;

use serde_json::json;

use crate::config::BrowserConfig;
use crate::error::FetchError;

const COOKIE_DOMAIN: &str = ".dmm.co.jp";
const REFERER: &str = "https://video.dmm.co.jp/";

pub struct BrowserClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    user_agent: String,
}

impl BrowserClient {
    /// `timeout` bounds the whole render call, including the service's own
    /// navigation wait.
    pub fn new(
        config: &BrowserConfig,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            token: std::env::var("BROWSERLESS_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            user_agent: user_agent.to_string(),
        })
    }

    /// Fully rendered HTML of `url`.
    pub async fn content(&self, url: &str) -> Result<String, FetchError> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let cookie = |name: &str| json!({"name": name, "value": "1", "domain": COOKIE_DOMAIN, "path": "/"});
        let body = json!({
            "url": url,
            "cookies": [cookie("age_check_done"), cookie("ckcy")],
            "setExtraHTTPHeaders": {
                "Referer": REFERER,
                "Accept-Language": "ja-JP,ja;q=0.9",
            },
            "userAgent": self.user_agent,
            "gotoOptions": {"waitUntil": "networkidle2", "timeout": 45000},
            "bestAttempt": true,
        });

        let resp = self.client.post(&endpoint).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}
