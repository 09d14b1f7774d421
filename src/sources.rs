//! `cath sources`: configuration-level readiness of each fetcher.
//!
//! Nothing here touches the network; it only reports whether each source
//! has what it needs to be attempted.

use anyhow::Result;
use url::Url;

use crate::config::Config;
use crate::source_api::ApiCredentials;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub name: &'static str,
    pub status: String,
    pub healthy: bool,
}

fn endpoint_status(endpoint: &str) -> (String, bool) {
    match Url::parse(endpoint) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => ("OK".to_string(), true),
        Ok(_) => ("UNSUPPORTED SCHEME".to_string(), false),
        Err(_) if endpoint.trim().is_empty() => ("NOT CONFIGURED".to_string(), false),
        Err(_) => ("INVALID URL".to_string(), false),
    }
}

pub fn check_sources(config: &Config) -> Vec<SourceStatus> {
    let mut out = Vec::new();

    let (status, healthy) = match ApiCredentials::from_env() {
        Ok(_) => endpoint_status(&config.api.endpoint),
        Err(_) => ("NO CREDENTIALS".to_string(), false),
    };
    out.push(SourceStatus {
        name: "api",
        status,
        healthy,
    });

    let (status, healthy) = endpoint_status(&config.browser.endpoint);
    let token = std::env::var("BROWSERLESS_TOKEN").is_ok_and(|t| !t.is_empty());
    for name in ["probe", "samples"] {
        out.push(SourceStatus {
            name,
            status: if healthy && !token {
                format!("{} (no token)", status)
            } else {
                status.clone()
            },
            healthy,
        });
    }

    let (status, healthy) = endpoint_status(&config.api.listing_url);
    out.push(SourceStatus {
        name: "listing",
        status,
        healthy,
    });

    out
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<12} {:<24} HEALTHY", "SOURCE", "STATUS");
    for s in check_sources(config) {
        println!("{:<12} {:<24} {}", s.name, s.status, s.healthy);
    }
    Ok(())
}
