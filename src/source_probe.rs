//! Page prober: metadata the commerce API never exposes.
//!
//! The detail page is rendered through the browser service and parsed with
//! `scraper`. Parsing is a pure function of the HTML ([`ProbeParser::parse`])
//! so it can be tested against saved pages.
//!
//! Extracted fields:
//!
//! | Field | Where it comes from |
//! |-------|---------------------|
//! | `title` | first `<h1>` |
//! | `name` | `名前` row, else the title minus `【..】` prefix and site suffix |
//! | `label` | `レーベル` row, else a `label=` link |
//! | `series` | `シリーズ` row, else a `series=` link |
//! | `sizes` | `サイズ` row, page text, then JSON-LD descriptions |
//! | `review_body` | longest description candidate, sanitized, 2000 chars max |
//! | `sample_images` | image attributes, inline backgrounds, raw HTML, og:image |
//!
//! "Row" means a `dt`/`th` whose text contains the label, paired with the
//! next element sibling (`dd`/`td`).

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;
use tracing::debug;

use crate::browser::BrowserClient;
use crate::config::{BrowserConfig, Config};
use crate::error::FetchError;
use crate::models::RawRecord;
use crate::traits::RecordSource;
use crate::url_filter::{strip_query, SampleFilter};

const REVIEW_MAX_CHARS: usize = 2000;
const AGE_GATE_MARKER: &str = "年齢認証";

const REVIEW_SELECTORS: &[&str] = &[
    ".d-work__description",
    ".d-work__body",
    ".d-work__text",
    ".d-work__intro",
    ".amateur-detail__txt",
    ".amateur-detail__description",
    "section#introduction",
    "section#story",
    "div#description",
    "div#introduction",
    ".work-intro",
    ".work__description",
    ".intro",
    ".description",
    ".c-works__description",
];

/// Lines starting with these are navigation or boilerplate, not review text.
const REVIEW_NOISE_PREFIXES: &[&str] = &["特集", "※", "MENU"];

/// Compiled selectors and patterns.
pub struct ProbeParser {
    h1: Selector,
    row_labels: Selector,
    label_link: Selector,
    series_link: Selector,
    body: Selector,
    ld_json: Selector,
    og_description: Selector,
    meta_description: Selector,
    og_image: Selector,
    media: Selector,
    styled: Selector,
    review: Vec<Selector>,
    bwh: Regex,
    bwh_ja: Regex,
    height: Regex,
    bracket_prefix: Regex,
    site_suffix: Regex,
    css_url: Regex,
    raw_sample: Regex,
    numbered_tail: Regex,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{}': {:?}", css, e))
}

impl ProbeParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            h1: selector("h1")?,
            row_labels: selector("dt, th")?,
            label_link: selector("a[href*='label=']")?,
            series_link: selector("a[href*='series=']")?,
            body: selector("body")?,
            ld_json: selector(r#"script[type="application/ld+json"]"#)?,
            og_description: selector(r#"meta[property="og:description"]"#)?,
            meta_description: selector(r#"meta[name="description"]"#)?,
            og_image: selector(r#"meta[property="og:image"]"#)?,
            media: selector("img, source")?,
            styled: selector("[style*='background-image']")?,
            review: REVIEW_SELECTORS
                .iter()
                .map(|css| selector(css))
                .collect::<Result<Vec<_>>>()?,
            bwh: Regex::new(
                r"(?is)B\s*[:：]?\s*([0-9]{2,3})\D+W\s*[:：]?\s*([0-9]{2,3})\D+H\s*[:：]?\s*([0-9]{2,3})",
            )?,
            bwh_ja: Regex::new(
                r"(?s)バスト\s*[:：]?\s*([0-9]{2,3}).{0,30}?(?:ウエスト|ウェスト)\s*[:：]?\s*([0-9]{2,3}).{0,30}?ヒップ\s*[:：]?\s*([0-9]{2,3})",
            )?,
            height: Regex::new(r"(?:T|Ｔ|身長)\s*[:：]?\s*([0-9]{2,3})")?,
            bracket_prefix: Regex::new(r"^[【\[].*?[】\]]\s*")?,
            site_suffix: Regex::new(r"\s*\|\s*FANZA.*$")?,
            css_url: Regex::new(r#"(?i)url\(\s*["']?([^"')]+)["']?\s*\)"#)?,
            raw_sample: Regex::new(
                r#"(?i)https?://[a-z0-9.-]+\.dmm\.co\.jp/[^"'<>\s]+?j[ps]-[0-9]+\.(?:jpg|jpeg|webp|png)"#,
            )?,
            numbered_tail: Regex::new(r"(?i)jp-[0-9]+\.jpg$")?,
        })
    }

    /// Parse a rendered detail page. `images` scopes the sample harvest to
    /// allowed hosts; CID scoping is left to the URL filter.
    pub fn parse(&self, html: &str, cid: &str, images: &SampleFilter) -> RawRecord {
        let doc = Html::parse_document(html);
        let mut rec = RawRecord::new();
        let put = |rec: &mut RawRecord, key: &str, val: Option<String>| {
            if let Some(v) = val.filter(|v| !v.is_empty()) {
                rec.insert(key, Value::String(v));
            }
        };

        let title = doc.select(&self.h1).next().map(|h| squash(&text_of(h)));
        put(&mut rec, "cid", Some(cid.to_string()));
        put(&mut rec, "title", title.clone());
        put(&mut rec, "name", self.name(&doc, title.as_deref()));
        put(
            &mut rec,
            "label",
            self.row_value(&doc, "レーベル")
                .or_else(|| first_text(&doc, &self.label_link)),
        );
        put(
            &mut rec,
            "series",
            self.row_value(&doc, "シリーズ")
                .or_else(|| first_text(&doc, &self.series_link)),
        );
        put(&mut rec, "sizes", self.sizes(&doc));
        put(&mut rec, "review_body", self.review(&doc));

        let samples = self.samples(&doc, images);
        rec.insert(
            "sample_images",
            Value::Array(samples.into_iter().map(Value::String).collect()),
        );
        rec
    }

    pub fn is_age_gate(&self, html: &str) -> bool {
        let doc = Html::parse_document(html);
        doc.select(&self.h1)
            .next()
            .is_some_and(|h| text_of(h).contains(AGE_GATE_MARKER))
    }

    // ============ Labelled rows ============

    fn row_value(&self, doc: &Html, label: &str) -> Option<String> {
        doc.select(&self.row_labels)
            .filter(|el| text_of(*el).contains(label))
            .find_map(|el| {
                el.next_siblings()
                    .find_map(ElementRef::wrap)
                    .map(|v| squash(&text_of(v)))
                    .filter(|v| !v.is_empty())
            })
    }

    fn name(&self, doc: &Html, title: Option<&str>) -> Option<String> {
        if let Some(name) = self.row_value(doc, "名前") {
            return Some(name);
        }
        let title = title?;
        let stripped = self.bracket_prefix.replace(title, "");
        let stripped = self.site_suffix.replace(&stripped, "");
        let stripped = stripped.trim();
        (!stripped.is_empty()).then(|| stripped.to_string())
    }

    // ============ Measurements ============

    fn sizes(&self, doc: &Html) -> Option<String> {
        if let Some(cell) = self.row_value(doc, "サイズ") {
            if let Some(sizes) = self.parse_sizes(&cell, true) {
                return Some(sizes);
            }
        }

        let body = doc
            .select(&self.body)
            .next()
            .map(block_text)
            .unwrap_or_default();
        if let Some(sizes) = self.parse_sizes(&body, false) {
            return Some(sizes);
        }
        for line in body.lines() {
            if line.contains("サイズ") || line.contains("身長") {
                if let Some(sizes) = self.parse_sizes(line, true) {
                    return Some(sizes);
                }
            }
        }

        self.ld_descriptions(doc)
            .iter()
            .find_map(|d| self.parse_sizes(d, true))
    }

    /// `T158 B88 W57 H84`, `B88 W57 H84`, or with `allow_height_only`
    /// `T158 B-- W-- H--`. Full-width digits are accepted.
    pub fn parse_sizes(&self, text: &str, allow_height_only: bool) -> Option<String> {
        let text = to_half_width(text);
        let height = self
            .height
            .captures(&text)
            .map(|c| c[1].to_string());

        let bwh = self
            .bwh
            .captures(&text)
            .or_else(|| self.bwh_ja.captures(&text))
            .map(|c| (c[1].to_string(), c[2].to_string(), c[3].to_string()));

        match (bwh, height) {
            (Some((b, w, h)), Some(t)) => Some(format!("T{} B{} W{} H{}", t, b, w, h)),
            (Some((b, w, h)), None) => Some(format!("B{} W{} H{}", b, w, h)),
            (None, Some(t)) if allow_height_only => Some(format!("T{} B-- W-- H--", t)),
            _ => None,
        }
    }

    // ============ Review text ============

    fn review(&self, doc: &Html) -> Option<String> {
        let mut candidates: Vec<String> = Vec::new();
        for sel in &self.review {
            let joined = doc
                .select(sel)
                .map(block_text)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if !joined.is_empty() {
                candidates.push(joined);
            }
        }
        candidates.extend(self.ld_descriptions(doc));
        for sel in [&self.og_description, &self.meta_description] {
            if let Some(content) = doc
                .select(sel)
                .next()
                .and_then(|m| m.value().attr("content"))
            {
                candidates.push(content.trim().to_string());
            }
        }

        candidates
            .iter()
            .map(|c| sanitize_review(c))
            .filter(|c| !c.is_empty())
            .fold(None::<String>, |best, c| match best {
                Some(b) if b.chars().count() >= c.chars().count() => Some(b),
                _ => Some(c),
            })
            .map(|best| best.chars().take(REVIEW_MAX_CHARS).collect::<String>())
            .map(|s| s.trim().to_string())
    }

    fn ld_descriptions(&self, doc: &Html) -> Vec<String> {
        let mut out = Vec::new();
        for script in doc.select(&self.ld_json) {
            let raw = script.text().collect::<String>();
            let Ok(data) = serde_json::from_str::<Value>(&raw) else {
                continue;
            };
            let entries = match data {
                Value::Array(items) => items,
                other => vec![other],
            };
            for entry in entries {
                if let Some(desc) = entry.get("description").and_then(Value::as_str) {
                    let desc = desc.trim();
                    if !desc.is_empty() {
                        out.push(desc.to_string());
                    }
                }
            }
        }
        out
    }

    // ============ Sample images ============

    fn samples(&self, doc: &Html, images: &SampleFilter) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut add = |url: &str| {
            if let Some(url) = absolutize(url) {
                if images.is_allowed_image(&url) {
                    found.insert(strip_query(&url).to_string());
                }
            }
        };

        for el in doc.select(&self.media) {
            let attrs = el.value();
            for name in ["src", "data-src", "data-original"] {
                if let Some(v) = attrs.attr(name) {
                    add(v);
                }
            }
            if let Some(srcset) = attrs.attr("srcset") {
                for part in srcset.split(',') {
                    if let Some(url) = part.split_whitespace().next() {
                        add(url);
                    }
                }
            }
        }

        for el in doc.select(&self.styled) {
            if let Some(style) = el.value().attr("style") {
                for cap in self.css_url.captures_iter(style) {
                    add(&cap[1]);
                }
            }
        }

        // Last net: URLs embedded in scripts or attributes the selectors
        // above do not cover. Head metadata is not scanned.
        let body_html = doc
            .select(&self.body)
            .next()
            .map(|b| b.html())
            .unwrap_or_default();
        for m in self.raw_sample.find_iter(&body_html) {
            add(m.as_str());
        }

        if found.is_empty() {
            if let Some(og) = doc
                .select(&self.og_image)
                .next()
                .and_then(|m| m.value().attr("content"))
            {
                let base = strip_query(og.trim());
                if images.is_allowed_image(base) && self.numbered_tail.is_match(base) {
                    for i in 1..=10 {
                        let url = self
                            .numbered_tail
                            .replace(base, format!("jp-{}.jpg", i).as_str());
                        found.insert(url.into_owned());
                    }
                }
            }
        }

        found.into_iter().collect()
    }
}

// ============ Text helpers ============

/// Concatenated text of an element.
fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

/// Text with line breaks at block boundaries and `<br>`, so line-based
/// sanitizing sees the same lines a reader would.
fn block_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => {
                if matches!(
                    e.name(),
                    "br" | "p" | "div" | "li" | "dt" | "dd" | "tr" | "section" | "h1" | "h2" | "h3"
                ) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    out
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .map(|el| squash(&text_of(el)))
        .find(|t| !t.is_empty())
}

/// Collapse runs of whitespace into one space.
fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn to_half_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            _ => c,
        })
        .collect()
}

fn sanitize_review(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !REVIEW_NOISE_PREFIXES.iter().any(|p| l.starts_with(p)))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn absolutize(url: &str) -> Option<String> {
    let url = url.trim().trim_matches(|c| c == '"' || c == '\'');
    if url.starts_with("//") {
        return Some(format!("https:{}", url));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Some(url.to_string());
    }
    None
}

// ============ Fetcher ============

pub struct PageProber {
    browser: BrowserClient,
    parser: ProbeParser,
    images: SampleFilter,
    browser_config: BrowserConfig,
    timeout: Duration,
}

impl PageProber {
    pub fn new(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.browser.probe_timeout_secs);
        Ok(Self {
            browser: BrowserClient::new(&config.browser, &config.images.user_agent, timeout)?,
            parser: ProbeParser::new()?,
            images: SampleFilter::new(&config.images),
            browser_config: config.browser.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl RecordSource for PageProber {
    fn name(&self) -> &str {
        "probe"
    }

    async fn fetch(&self, cid: &str) -> Result<RawRecord, FetchError> {
        let url = self.browser_config.detail_url(cid);
        let html = tokio::time::timeout(self.timeout, self.browser.content(&url))
            .await
            .map_err(|_| FetchError::Timeout {
                what: format!("probe {}", cid),
                secs: self.timeout.as_secs(),
            })??;

        if self.parser.is_age_gate(&html) {
            return Err(FetchError::Decode(format!(
                "age verification page returned for {}",
                url
            )));
        }

        let mut rec = self.parser.parse(&html, cid, &self.images);
        rec.insert("url_resolved", Value::String(url));
        debug!(
            cid,
            fields = rec.as_map().len(),
            samples = rec.str_list("sample_images").len(),
            "probe parsed"
        );
        Ok(rec)
    }
}
