//! Commerce API fetcher.
//!
//! Talks to the affiliate `ItemList` endpoint (JSON output) and flattens
//! each item into a [`RawRecord`] with the field names the rest of the
//! pipeline uses. Two roles:
//!
//! - [`RecordSource`]: look one CID up by keyword, keeping the richest exact
//!   match across four site/service variants, then falling back to paging
//!   through the date-sorted listing.
//! - [`CandidateSource`]: freshest-first CID listing for automatic runs.
//!
//! A second [`CandidateSource`], [`HtmlListing`], scrapes CIDs from the
//! public list page and is used when the API listing comes back empty.
//!
//! # Environment Variables
//!
//! - `API_ID` (or `DMM_API_ID`), required
//! - `AFFILIATE_ID` (or `DMM_AFFILIATE_ID`), required

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::models::{canonical_cid, RawRecord};
use crate::traits::{CandidateSource, RecordSource};

const FLOOR: &str = "videoc";
const LISTING_HITS: u32 = 50;
const LISTING_OFFSETS: [u32; 5] = [1, 51, 101, 151, 201];

/// `(site, service)` pairs tried for keyword lookups.
const SEARCH_VARIANTS: [(Option<&str>, &str); 4] = [
    (Some("FANZA"), "digital"),
    (Some("FANZA"), "amateur"),
    (Some("DMM.com"), "digital"),
    (None, "digital"),
];

/// `(site, service)` pairs tried for the latest listing.
const LISTING_VARIANTS: [(Option<&str>, &str); 3] = [
    (Some("FANZA"), "digital"),
    (Some("FANZA"), "amateur"),
    (None, "digital"),
];

// ============ Credentials ============

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_id: String,
    pub affiliate_id: String,
}

impl ApiCredentials {
    pub fn from_env() -> Result<Self, FetchError> {
        let api_id = first_env(&["API_ID", "DMM_API_ID"])
            .ok_or_else(|| FetchError::Credentials("API_ID / DMM_API_ID not set".to_string()))?;
        let affiliate_id = first_env(&["AFFILIATE_ID", "DMM_AFFILIATE_ID"]).ok_or_else(|| {
            FetchError::Credentials("AFFILIATE_ID / DMM_AFFILIATE_ID not set".to_string())
        })?;
        Ok(Self {
            api_id,
            affiliate_id,
        })
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
}

// ============ Fetcher ============

pub struct ApiFetcher {
    client: reqwest::Client,
    config: ApiConfig,
    creds: Option<ApiCredentials>,
}

impl ApiFetcher {
    /// Missing credentials are not an error here; every call then fails
    /// with [`FetchError::Credentials`], which the pipeline treats as the
    /// source being unavailable.
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let creds = match ApiCredentials::from_env() {
            Ok(c) => Some(c),
            Err(e) => {
                debug!(error = %e, "commerce API disabled");
                None
            }
        };
        Ok(Self {
            client,
            config: config.clone(),
            creds,
        })
    }

    fn creds(&self) -> Result<&ApiCredentials, FetchError> {
        self.creds
            .as_ref()
            .ok_or_else(|| FetchError::Credentials("API_ID / AFFILIATE_ID not set".to_string()))
    }

    async fn call_item_list(
        &self,
        site: Option<&str>,
        service: &str,
        hits: u32,
        offset: u32,
        keyword: Option<&str>,
    ) -> Result<Vec<Value>, FetchError> {
        let creds = self.creds()?;
        let mut params: Vec<(&str, String)> = vec![
            ("api_id", creds.api_id.clone()),
            ("affiliate_id", creds.affiliate_id.clone()),
            ("service", service.to_string()),
            ("floor", FLOOR.to_string()),
            ("sort", "date".to_string()),
            ("hits", hits.to_string()),
            ("offset", offset.to_string()),
            ("output", "json".to_string()),
        ];
        if let Some(site) = site {
            params.push(("site", site.to_string()));
        }
        if let Some(keyword) = keyword {
            params.push(("keyword", keyword.to_string()));
        }

        let resp = self
            .client
            .get(&self.config.endpoint)
            .query(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = resp.json().await?;
        Ok(extract_items(body))
    }

    /// Look `cid` up. `Ok(None)` when the API has no such item.
    pub async fn search_by_cid(&self, cid: &str) -> Result<Option<RawRecord>, FetchError> {
        let mut best: Option<(usize, Value)> = None;
        let mut last_err = None;

        for (site, service) in SEARCH_VARIANTS {
            let items = match self
                .call_item_list(site, service, self.config.hits, 1, Some(cid))
                .await
            {
                Ok(items) => items,
                Err(e @ FetchError::Credentials(_)) => return Err(e),
                Err(e) => {
                    debug!(cid, ?site, service, error = %e, "keyword lookup failed");
                    last_err = Some(e);
                    continue;
                }
            };
            for item in items {
                if extract_cid_from_item(&item).as_deref() != Some(cid) {
                    continue;
                }
                let score = richness(&item);
                if best.as_ref().map_or(true, |(s, _)| score > *s) {
                    best = Some((score, item));
                }
            }
        }

        if let Some((_, item)) = best {
            return Ok(Some(normalize_item(&item)));
        }

        for page in 0..self.config.max_pages {
            let offset = page * self.config.hits + 1;
            let items = match self
                .call_item_list(Some("FANZA"), "digital", self.config.hits, offset, None)
                .await
            {
                Ok(items) => {
                    last_err = None;
                    items
                }
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            };
            if items.is_empty() {
                return Ok(None);
            }
            if let Some(item) = items
                .iter()
                .find(|i| extract_cid_from_item(i).as_deref() == Some(cid))
            {
                return Ok(Some(normalize_item(item)));
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RecordSource for ApiFetcher {
    fn name(&self) -> &str {
        "api"
    }

    async fn fetch(&self, cid: &str) -> Result<RawRecord, FetchError> {
        Ok(self.search_by_cid(cid).await?.unwrap_or_default())
    }
}

#[async_trait]
impl CandidateSource for ApiFetcher {
    fn name(&self) -> &str {
        "api"
    }

    async fn latest_cids(&self, limit: usize) -> Result<Vec<String>, FetchError> {
        let mut got = Vec::new();
        let mut seen = HashSet::new();
        let mut last_err = None;

        for (site, service) in LISTING_VARIANTS {
            for offset in LISTING_OFFSETS {
                let items = match self
                    .call_item_list(site, service, LISTING_HITS, offset, None)
                    .await
                {
                    Ok(items) => items,
                    Err(e @ FetchError::Credentials(_)) => return Err(e),
                    Err(e) => {
                        warn!(?site, service, offset, error = %e, "listing call failed");
                        last_err = Some(e);
                        continue;
                    }
                };
                for cid in items.iter().filter_map(extract_cid_from_item) {
                    if seen.insert(cid.clone()) {
                        got.push(cid);
                    }
                    if got.len() >= limit {
                        return Ok(got);
                    }
                }
            }
        }

        match last_err {
            Some(e) if got.is_empty() => Err(e),
            _ => Ok(got),
        }
    }
}

// ============ Item normalization ============

fn extract_items(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("result") {
            Some(Value::Object(mut result)) => match result.remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn str_of<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// CID of an API item: its `cid` field, or the `id=` query parameter of
/// its detail URL.
pub fn extract_cid_from_item(item: &Value) -> Option<String> {
    if let Some(cid) = str_of(item, &["cid"]) {
        return canonical_cid(cid);
    }
    let link = str_of(item, &["URL", "url"])?;
    let parsed = url::Url::parse(link).ok()?;
    let id = parsed
        .query_pairs()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v.into_owned())?;
    canonical_cid(&id)
}

/// Names of a `[{ "name": .. }, ..]` list.
fn names(list: Option<&Value>) -> Vec<String> {
    list.and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|x| x.get("name").and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn pick_poster(image_url: Option<&Value>) -> Option<String> {
    let image_url = image_url?;
    ["large", "list", "small"]
        .iter()
        .filter_map(|k| image_url.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn pick_sample_images(sample: Option<&Value>) -> Vec<String> {
    let Some(sample) = sample else {
        return Vec::new();
    };
    let mut urls: Vec<String> = Vec::new();
    for size_key in ["sample_s", "sample", "sample_l"] {
        let Some(images) = sample
            .get(size_key)
            .and_then(|b| b.get("image"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for img in images {
            let url = match img {
                Value::String(s) => Some(s.as_str()),
                Value::Object(_) => str_of(img, &["image", "url"]),
                _ => None,
            };
            if let Some(url) = url.filter(|u| !u.is_empty()) {
                urls.push(url.to_string());
            }
        }
    }
    if urls.is_empty() {
        if let Some(list) = sample.as_array() {
            urls.extend(
                list.iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
    }
    crate::url_filter::dedup_preserving_order(urls)
}

/// Best sample movie URL: 1080p over 720p over 480p over any mp4, then the
/// longest URL. Ties keep the first seen.
fn pick_sample_movie(movie: Option<&Value>) -> Option<String> {
    let movie = movie?.as_object()?;
    let is_http = |s: &&str| s.starts_with("http://") || s.starts_with("https://");
    let mut candidates: Vec<&str> = Vec::new();
    for v in movie.values() {
        match v {
            Value::String(s) if is_http(&s.as_str()) => candidates.push(s),
            Value::Object(inner) => candidates.extend(
                inner
                    .values()
                    .filter_map(Value::as_str)
                    .filter(is_http),
            ),
            _ => {}
        }
    }
    let rank = |u: &str| {
        (
            u.contains("1080"),
            u.contains("720"),
            u.contains("480"),
            u.contains("mp4"),
            u.len(),
        )
    };
    let mut best: Option<&str> = None;
    for c in candidates {
        if best.map_or(true, |b| rank(c) > rank(b)) {
            best = Some(c);
        }
    }
    best.map(str::to_string)
}

/// Genre count plus one point each for sample images, a sample movie and
/// a large package image.
fn richness(item: &Value) -> usize {
    let genres = item
        .get("iteminfo")
        .and_then(|i| i.get("genre"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let present = |v: Option<&Value>| match v {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    };
    genres
        + present(item.get("sampleImageURL")) as usize
        + present(item.get("sampleMovieURL")) as usize
        + present(item.get("imageURL").and_then(|i| i.get("large"))) as usize
}

fn put_str(rec: &mut Map<String, Value>, key: &str, val: Option<String>) {
    if let Some(v) = val {
        rec.insert(key.to_string(), Value::String(v));
    }
}

/// Flatten one API item into the pipeline's field names.
pub fn normalize_item(item: &Value) -> RawRecord {
    let mut rec = Map::new();

    put_str(&mut rec, "cid", extract_cid_from_item(item));
    put_str(&mut rec, "title", str_of(item, &["title"]).map(str::to_string));
    put_str(&mut rec, "url", str_of(item, &["URL", "url"]).map(str::to_string));
    put_str(
        &mut rec,
        "affiliate_url",
        str_of(item, &["affiliateURL", "affiliate_url"]).map(str::to_string),
    );
    put_str(
        &mut rec,
        "poster_url",
        pick_poster(item.get("imageURL").or_else(|| item.get("image_url"))),
    );
    rec.insert(
        "sample_images".to_string(),
        json!(pick_sample_images(
            item.get("sampleImageURL")
                .or_else(|| item.get("sample_image_url"))
        )),
    );
    put_str(
        &mut rec,
        "sample_movie_url",
        pick_sample_movie(
            item.get("sampleMovieURL")
                .or_else(|| item.get("sample_movie_url")),
        ),
    );

    let info = item.get("iteminfo");
    let field = |k: &str| info.and_then(|i| i.get(k));
    rec.insert("genres".to_string(), json!(names(field("genre"))));
    rec.insert("performers".to_string(), json!(names(field("performer"))));
    put_str(&mut rec, "series", names(field("series")).into_iter().next());
    put_str(&mut rec, "maker", names(field("maker")).into_iter().next());

    // `review` is `{count, average}` in v3 responses, a bare count in older
    // ones.
    match item.get("review") {
        Some(Value::Object(review)) => {
            if let Some(count) = review.get("count") {
                rec.insert("review_count".to_string(), count.clone());
            }
            if let Some(avg) = review.get("average") {
                rec.insert("review_average".to_string(), avg.clone());
            }
        }
        Some(v @ (Value::Number(_) | Value::String(_))) => {
            rec.insert("review_count".to_string(), v.clone());
        }
        _ => {}
    }
    for (from, to) in [
        ("review_count", "review_count"),
        ("reviewAverage", "review_average"),
        ("review_average", "review_average"),
    ] {
        if !rec.contains_key(to) {
            if let Some(v @ (Value::Number(_) | Value::String(_))) = item.get(from) {
                rec.insert(to.to_string(), v.clone());
            }
        }
    }

    put_str(
        &mut rec,
        "date",
        str_of(item, &["date", "release_date"]).map(str::to_string),
    );
    if let Some(prices) = item.get("prices") {
        let price = ["price", "price_download"]
            .iter()
            .filter_map(|k| prices.get(*k))
            .find(|v| matches!(v, Value::Number(_)) || v.as_str().is_some_and(|s| !s.is_empty()));
        if let Some(price) = price {
            rec.insert("price".to_string(), price.clone());
        }
    }
    rec.insert("source".to_string(), json!("api"));

    RawRecord::from(rec)
}

// ============ HTML listing fallback ============

/// Scrapes `/amateur/content/?id=<cid>` links from the public list page.
pub struct HtmlListing {
    client: reqwest::Client,
    url: String,
}

impl HtmlListing {
    pub fn new(config: &ApiConfig, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: config.listing_url.clone(),
        })
    }
}

#[async_trait]
impl CandidateSource for HtmlListing {
    fn name(&self) -> &str {
        "html"
    }

    async fn latest_cids(&self, limit: usize) -> Result<Vec<String>, FetchError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Api {
                status: status.as_u16(),
                message: format!("listing page {}", self.url),
            });
        }
        let html = resp.text().await?;
        cids_from_listing(&html, limit)
    }
}

/// Distinct CIDs linked from a listing page, in page order.
pub fn cids_from_listing(html: &str, limit: usize) -> Result<Vec<String>, FetchError> {
    let re = Regex::new(r"(?i)/amateur/content/\?id=([a-z0-9_]+)")
        .map_err(|e| FetchError::Decode(e.to_string()))?;
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for cap in re.captures_iter(html) {
        if out.len() >= limit {
            break;
        }
        if let Some(cid) = canonical_cid(&cap[1]) {
            if seen.insert(cid.clone()) {
                out.push(cid);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> Value {
        json!({
            "content_id": "sweet101",
            "title": "Sample title",
            "URL": "https://video.dmm.co.jp/amateur/content/?id=sweet101",
            "affiliateURL": "https://al.dmm.co.jp/?lurl=x",
            "imageURL": {
                "list": "https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101jm.jpg",
                "large": "https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101jp.jpg"
            },
            "sampleImageURL": {
                "sample_s": {"image": [
                    "https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101js-001.jpg",
                    "https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101js-002.jpg"
                ]},
                "sample_l": {"image": [
                    "https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101jp-001.jpg",
                    "https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101js-001.jpg"
                ]}
            },
            "sampleMovieURL": {
                "size_476_306": "https://www.dmm.co.jp/litevideo/-/part/=/cid=sweet101/size=476_306/",
                "size_720_480": "https://www.dmm.co.jp/litevideo/-/part/=/cid=sweet101/size=720_480/",
                "pc_flag": 1
            },
            "review": {"count": 12, "average": "4.50"},
            "prices": {"price": "500~"},
            "date": "2025-11-28 10:00:00",
            "iteminfo": {
                "genre": [{"id": 1, "name": "g1"}, {"id": 2, "name": "g2"}],
                "maker": [{"id": 9, "name": "Maker"}],
                "label": [{"id": 7, "name": "Label"}]
            }
        })
    }

    #[test]
    fn normalize_flattens_item() {
        let rec = normalize_item(&sample_item());
        assert_eq!(rec.cid().as_deref(), Some("sweet101"));
        assert_eq!(rec.str_field("title"), Some("Sample title"));
        assert_eq!(
            rec.str_field("poster_url"),
            Some("https://pics.dmm.co.jp/digital/amateur/sweet101/sweet101jp.jpg")
        );
        assert_eq!(rec.str_list("sample_images").len(), 3);
        assert_eq!(rec.str_list("genres"), vec!["g1", "g2"]);
        assert_eq!(rec.str_field("maker"), Some("Maker"));
        assert!(rec.str_list("performers").is_empty());
        assert_eq!(rec.get("review_count"), Some(&json!(12)));
        assert_eq!(rec.get("review_average"), Some(&json!("4.50")));
        assert_eq!(rec.get("price"), Some(&json!("500~")));
        assert_eq!(rec.str_field("source"), Some("api"));
        assert!(rec
            .str_field("sample_movie_url")
            .unwrap()
            .contains("720_480"));
    }

    #[test]
    fn cid_from_url_when_field_missing() {
        let item = json!({"url": "https://www.dmm.co.jp/x/?id=ABC123&foo=1"});
        assert_eq!(extract_cid_from_item(&item).as_deref(), Some("abc123"));
        assert_eq!(extract_cid_from_item(&json!({"title": "x"})), None);
    }

    #[test]
    fn sample_movie_prefers_resolution_then_length() {
        let movie = json!({
            "a": "https://x/480/short.mp4",
            "b": {"inner": "https://x/1080/clip.mp4"},
            "c": "not a url"
        });
        assert_eq!(
            pick_sample_movie(Some(&movie)).as_deref(),
            Some("https://x/1080/clip.mp4")
        );
        assert_eq!(pick_sample_movie(Some(&json!({}))), None);
    }

    #[test]
    fn richness_counts_genres_and_media() {
        assert_eq!(richness(&sample_item()), 5);
        assert_eq!(richness(&json!({"cid": "x"})), 0);
    }

    #[test]
    fn extract_items_tolerates_odd_shapes() {
        assert!(extract_items(json!({"result": {"items": "nope"}})).is_empty());
        assert!(extract_items(json!([1, 2])).is_empty());
        assert_eq!(
            extract_items(json!({"result": {"items": [{"cid": "a"}]}})).len(),
            1
        );
    }

    #[test]
    fn listing_scrape_dedups_in_order() {
        let html = r#"
            <a href="/amateur/content/?id=bbb2">b</a>
            <a href="https://video.dmm.co.jp/amateur/content/?id=AAA1">a</a>
            <a href="/amateur/content/?id=bbb2">b again</a>
            <a href="/amateur/content/?id=ccc3">c</a>
        "#;
        assert_eq!(
            cids_from_listing(html, 60).unwrap(),
            vec!["bbb2", "aaa1", "ccc3"]
        );
        assert_eq!(cids_from_listing(html, 1).unwrap(), vec!["bbb2"]);
    }
}
