//! Core record types.
//!
//! Source fetchers hand back [`RawRecord`]s: loose JSON objects that may lack
//! any field or carry it in an unexpected shape. Nothing reads a raw record
//! except through the accessors here, which treat a wrong shape exactly like
//! absence.
//!
//! The Merge Engine turns raw records into one [`EnrichedRecord`] per CID,
//! which is what every log, snapshot and draft is made from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical form of a content identifier: trimmed and lowercased.
///
/// Returns `None` for empty input or input containing anything other than
/// ASCII letters, digits and `_`.
pub fn canonical_cid(raw: &str) -> Option<String> {
    let cid = raw.trim().to_ascii_lowercase();
    if cid.is_empty() {
        return None;
    }
    if !cid
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    Some(cid)
}

/// A schema-less record as returned by one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap any JSON value; non-objects become an empty record.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::new(),
        }
    }

    /// Parse one JSON document. Returns `None` if it is not valid JSON.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<Value>(text).ok().map(Self::from_value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Non-empty string value of `key`.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// First non-empty string among `keys`.
    pub fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.str_field(k))
    }

    /// Non-empty strings of the array at `key`; other elements are skipped.
    pub fn str_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether `key` holds a value that counts as "present": not null, not
    /// `false`, not zero, not an empty string, array or object.
    pub fn is_truthy(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }

    /// CID of this record in canonical form, if it carries a usable one.
    pub fn cid(&self) -> Option<String> {
        self.str_field("cid").and_then(canonical_cid)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Fields of [`EnrichedRecord`] with a dedicated slot; everything else from
/// the sources is carried through in `extra`.
const KNOWN_FIELDS: &[&str] = &[
    "cid",
    "title",
    "url",
    "affiliate_url",
    "poster_url",
    "sample_images",
    "sample_movie_url",
    "genres",
    "series",
    "maker",
    "performers",
    "review_count",
    "review_average",
    "date",
    "price",
    "sizes",
    "sizes_text",
    "review_body",
    "name",
    "label",
    "_ts",
];

/// The canonical merged representation of one catalog item.
///
/// `cid` is required for every persistence stage; a record with an empty
/// `cid` can exist in memory but is discarded before archiving or queueing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichedRecord {
    pub cid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliate_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    pub sample_images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_movie_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maker: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub performers: Vec<String>,
    // Number or numeric string depending on the API response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_count: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_average: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Value>,
    /// Free-text measurements, e.g. `T158 B88 W57 H84`. Never parsed here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sizes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sizes_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Ingestion timestamp (RFC 3339, UTC).
    #[serde(rename = "_ts", skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnrichedRecord {
    /// Build a record from a raw one, defensively. Known fields with the
    /// wrong shape are dropped; unknown fields are kept in `extra`.
    pub fn from_raw(raw: RawRecord) -> Self {
        let text = |key: &str| raw.str_field(key).map(str::to_string);
        let scalar = |key: &str| match raw.get(key) {
            Some(v @ (Value::Number(_) | Value::String(_))) => Some(v.clone()),
            _ => None,
        };

        let mut record = EnrichedRecord {
            cid: raw.cid().unwrap_or_default(),
            title: text("title"),
            url: text("url"),
            affiliate_url: text("affiliate_url"),
            poster_url: text("poster_url"),
            sample_images: raw.str_list("sample_images"),
            sample_movie_url: text("sample_movie_url"),
            genres: raw.str_list("genres"),
            series: text("series"),
            maker: text("maker"),
            performers: raw.str_list("performers"),
            review_count: scalar("review_count"),
            review_average: scalar("review_average"),
            date: text("date"),
            price: scalar("price"),
            sizes: text("sizes"),
            sizes_text: text("sizes_text"),
            review_body: text("review_body"),
            name: text("name"),
            label: text("label"),
            ingested_at: text("_ts"),
            extra: Map::new(),
        };

        for (key, value) in raw.0 {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                record.extra.insert(key, value);
            }
        }
        record
    }

    pub fn has_cid(&self) -> bool {
        !self.cid.is_empty()
    }

    /// Measurement text, preferring `sizes` over `sizes_text`.
    pub fn sizes_display(&self) -> Option<&str> {
        self.sizes.as_deref().or(self.sizes_text.as_deref())
    }

    /// Review text, preferring `review_body` over the legacy keys some
    /// older log lines carry in `extra`.
    pub fn review_display(&self) -> Option<&str> {
        self.review_body.as_deref().or_else(|| {
            ["review_html", "review", "description"]
                .iter()
                .find_map(|k| match self.extra.get(*k) {
                    Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
                    _ => None,
                })
        })
    }

    /// Date portion of `date` (`"2025-11-28 10:00:00"` → `"2025-11-28"`).
    pub fn date_part(&self) -> Option<&str> {
        self.date
            .as_deref()
            .and_then(|d| d.split(' ').next())
            .filter(|d| !d.is_empty())
    }

    /// Serialize as one JSON line (no trailing newline).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Publish-queue descriptor, one per CID, written by the draft generator and
/// consumed by the publish importer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub cid: String,
    pub draft_path: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_cid_lowercases_and_trims() {
        assert_eq!(canonical_cid("  SWEET101 "), Some("sweet101".to_string()));
        assert_eq!(canonical_cid("h_1234abc"), Some("h_1234abc".to_string()));
        assert_eq!(canonical_cid(""), None);
        assert_eq!(canonical_cid("../etc"), None);
    }

    #[test]
    fn accessors_tolerate_wrong_shapes() {
        let raw = RawRecord::from_value(json!({
            "title": 42,
            "genres": ["a", 1, "", "b"],
            "performers": "not a list",
            "review": "",
            "description": "desc",
        }));
        assert_eq!(raw.str_field("title"), None);
        assert_eq!(raw.str_list("genres"), vec!["a", "b"]);
        assert!(raw.str_list("performers").is_empty());
        assert_eq!(
            raw.first_str(&["review_body", "review", "description"]),
            Some("desc")
        );
    }

    #[test]
    fn non_object_value_is_empty_record() {
        assert!(RawRecord::from_value(json!([1, 2])).is_empty());
        assert!(RawRecord::parse("not json").is_none());
    }

    #[test]
    fn truthiness_matches_presence_rules() {
        let raw = RawRecord::from_value(json!({
            "empty_list": [],
            "zero": 0,
            "null": null,
            "list": ["x"],
            "text": "y",
        }));
        assert!(!raw.is_truthy("empty_list"));
        assert!(!raw.is_truthy("zero"));
        assert!(!raw.is_truthy("null"));
        assert!(!raw.is_truthy("missing"));
        assert!(raw.is_truthy("list"));
        assert!(raw.is_truthy("text"));
    }

    #[test]
    fn from_raw_keeps_unknown_fields() {
        let raw = RawRecord::from_value(json!({
            "cid": "ABC123",
            "title": "T",
            "source": "api",
            "genres": null,
            "review_count": 3,
        }));
        let record = EnrichedRecord::from_raw(raw);
        assert_eq!(record.cid, "abc123");
        assert_eq!(record.title.as_deref(), Some("T"));
        assert!(record.genres.is_empty());
        assert_eq!(record.review_count, Some(json!(3)));
        assert_eq!(record.extra.get("source"), Some(&json!("api")));
        assert!(!record.extra.contains_key("genres"));
    }

    #[test]
    fn json_line_omits_absent_fields() {
        let record = EnrichedRecord {
            cid: "abc123".to_string(),
            title: Some("T".to_string()),
            ..Default::default()
        };
        let line = record.to_json_line().unwrap();
        assert_eq!(line, r#"{"cid":"abc123","title":"T","sample_images":[]}"#);
    }

    #[test]
    fn date_part_strips_time() {
        let record = EnrichedRecord {
            cid: "x".to_string(),
            date: Some("2025-11-28 10:00:00".to_string()),
            ..Default::default()
        };
        assert_eq!(record.date_part(), Some("2025-11-28"));
    }
}
