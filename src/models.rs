//! Core data models for share counts

use crate::error::{CountError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_64;

pub const FACEBOOK: &str = "Facebook";
pub const TWITTER: &str = "Twitter";
pub const PINTEREST: &str = "Pinterest";
pub const YUMMLY: &str = "Yummly";
pub const LINKEDIN: &str = "LinkedIn";

pub const SHARE_COUNT: &str = "share_count";
pub const LIKE_COUNT: &str = "like_count";
pub const COMMENT_COUNT: &str = "comment_count";
pub const TOTAL_COUNT: &str = "total_count";

/// Slug of the synthetic group holding counts for the primary https URL
pub const HTTPS_GROUP: &str = "https";
/// Slug of the synthetic group holding counts for the legacy http URL
pub const HTTP_GROUP: &str = "http";

/// A single entry in a [`Counts`] mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountValue {
    /// Plain counter, e.g. `Twitter: 12`
    Count(u64),
    /// Nested counters, e.g. `Facebook: { share_count, ..., total_count }`
    Nested(Counts),
}

impl CountValue {
    /// Contribution of this value to a grand total.
    ///
    /// Nested values contribute their `total_count` leaf only.
    pub fn total(&self) -> u64 {
        match self {
            CountValue::Count(n) => *n,
            CountValue::Nested(inner) => inner.value(&[TOTAL_COUNT]).unwrap_or(0),
        }
    }
}

/// Per-service share counts for one URL (or a merge of several URLs)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counts(BTreeMap<String, CountValue>);

impl Counts {
    pub fn new() -> Self {
        Counts(BTreeMap::new())
    }

    /// The zeroed template covering every built-in service
    pub fn defaults() -> Self {
        let mut facebook = Counts::new();
        for field in [SHARE_COUNT, LIKE_COUNT, COMMENT_COUNT, TOTAL_COUNT] {
            facebook.insert(field, CountValue::Count(0));
        }

        let mut counts = Counts::new();
        counts.insert(FACEBOOK, CountValue::Nested(facebook));
        for service in [TWITTER, PINTEREST, YUMMLY, LINKEDIN] {
            counts.insert(service, CountValue::Count(0));
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&CountValue> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CountValue> {
        self.0.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: CountValue) {
        self.0.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CountValue)> {
        self.0.iter()
    }

    /// Look up a leaf by path, e.g. `["Facebook", "share_count"]` or `["Twitter"]`
    pub fn value(&self, path: &[&str]) -> Option<u64> {
        let (first, rest) = path.split_first()?;
        match (self.0.get(*first)?, rest.is_empty()) {
            (CountValue::Count(n), true) => Some(*n),
            (CountValue::Nested(inner), false) => inner.value(rest),
            _ => None,
        }
    }

    /// Set a leaf by path, creating nested levels as needed.
    ///
    /// A leaf standing where a nested level is required is replaced.
    pub fn set(&mut self, path: &[&str], value: u64) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };

        if rest.is_empty() {
            self.0.insert((*first).to_string(), CountValue::Count(value));
            return;
        }

        let entry = self
            .0
            .entry((*first).to_string())
            .or_insert_with(|| CountValue::Nested(Counts::new()));
        if let CountValue::Count(_) = entry {
            *entry = CountValue::Nested(Counts::new());
        }
        if let CountValue::Nested(inner) = entry {
            inner.set(rest, value);
        }
    }

    /// Grand total: every top-level leaf plus each nested `total_count`,
    /// saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.0
            .values()
            .map(CountValue::total)
            .fold(0u64, u64::saturating_add)
    }

    /// Structural subtraction, saturating at zero.
    ///
    /// Only keys present in `self` are kept; keys only in `other` are ignored.
    pub fn saturating_sub(&self, other: &Counts) -> Counts {
        let mut result = Counts::new();
        for (key, value) in &self.0 {
            let next = match (value, other.0.get(key)) {
                (CountValue::Count(a), Some(CountValue::Count(b))) => {
                    CountValue::Count(a.saturating_sub(*b))
                }
                (CountValue::Nested(a), Some(CountValue::Nested(b))) => {
                    CountValue::Nested(a.saturating_sub(b))
                }
                (value, _) => value.clone(),
            };
            result.0.insert(key.clone(), next);
        }
        result
    }
}

impl FromIterator<(String, CountValue)> for Counts {
    fn from_iter<I: IntoIterator<Item = (String, CountValue)>>(iter: I) -> Self {
        Counts(iter.into_iter().collect())
    }
}

/// An independently tracked URL whose counts roll up into the parent item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountGroup {
    pub name: String,
    /// Absent for the synthetic `http`/`https` groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub counts: Counts,
    #[serde(default)]
    pub total: u64,
    /// Disabled groups keep their last counts but are no longer refreshed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl CountGroup {
    /// Create a group tracking an extra URL
    pub fn tracked(name: impl Into<String>, url: impl Into<String>) -> Self {
        CountGroup {
            name: name.into(),
            url: Some(url.into()),
            counts: Counts::new(),
            total: 0,
            disabled: false,
        }
    }

    /// Create one of the synthetic scheme groups
    pub fn synthetic(name: impl Into<String>, counts: Counts, total: u64) -> Self {
        CountGroup {
            name: name.into(),
            url: None,
            counts,
            total,
            disabled: false,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.url.is_none()
    }
}

/// Stored state for one content item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDocument {
    /// Merged counts over the primary URL and every group
    #[serde(default)]
    pub counts: Counts,
    #[serde(default)]
    pub total: u64,
    /// Epoch seconds of the last successful refresh
    #[serde(default)]
    pub last_updated: Option<i64>,
    /// Epoch seconds of the content's publish date, used for staleness only
    #[serde(default)]
    pub content_date: Option<i64>,
    #[serde(default)]
    pub groups: BTreeMap<String, CountGroup>,
}

impl CountDocument {
    /// Whether the document has ever been filled by a refresh
    pub fn has_data(&self) -> bool {
        self.last_updated.is_some() && !self.counts.is_empty()
    }

    /// Groups that still need fetching on refresh
    pub fn refreshable_groups(&self) -> impl Iterator<Item = (&String, &CountGroup)> {
        self.groups
            .iter()
            .filter(|(_, group)| !group.disabled && group.url.is_some())
    }
}

/// Stored state for the site URL or an arbitrary non-content URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlCountRecord {
    pub count: Counts,
    /// Epoch seconds of the last successful refresh
    pub datetime: i64,
    pub url: String,
    #[serde(default)]
    pub total: u64,
}

/// Identity of a trackable item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKey {
    /// A content item with a stable numeric ID
    Content(u64),
    /// The site's home URL
    Site,
    /// An arbitrary URL not backed by a content item
    Url(String),
}

impl ItemKey {
    pub fn is_content(&self) -> bool {
        matches!(self, ItemKey::Content(_))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Content(id) => write!(f, "{}", id),
            ItemKey::Site => write!(f, "site"),
            ItemKey::Url(url) => write!(f, "{}", url),
        }
    }
}

impl FromStr for ItemKey {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "site" {
            Ok(ItemKey::Site)
        } else if s.starts_with("http") {
            Ok(ItemKey::Url(s.to_string()))
        } else {
            s.parse::<u64>()
                .map(ItemKey::Content)
                .map_err(|_| CountError::UnknownItem(s.to_string()))
        }
    }
}

/// Current time as epoch seconds
pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Normalize a URL so equivalent spellings share one storage key.
///
/// Scheme and host are lowercased and an empty path becomes `/`. Input that
/// does not parse is only trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Stable hex digest of a normalized URL
pub fn url_hash(raw: &str) -> String {
    format!("{:016x}", xxh3_64(normalize_url(raw).as_bytes()))
}

/// The plain-http spelling of an https URL, if it is one
pub fn http_variant(url: &str) -> Option<String> {
    url.strip_prefix("https://")
        .map(|rest| format!("http://{}", rest))
}

/// Coerce a JSON value into a non-negative integer.
///
/// Numbers and numeric strings (leading digits, optional sign) are parsed and
/// their absolute value taken; `true` is 1; anything else is 0.
pub fn absint(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                v
            } else if let Some(v) = n.as_i64() {
                v.unsigned_abs()
            } else {
                n.as_f64().map(|f| f.trunc().abs() as u64).unwrap_or(0)
            }
        }
        serde_json::Value::String(s) => {
            let s = s.trim_start();
            let unsigned = s.strip_prefix(['-', '+']).unwrap_or(s);
            let digits: String = unsigned.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().unwrap_or(0)
        }
        serde_json::Value::Bool(true) => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_shape() {
        let counts = Counts::defaults();
        assert_eq!(counts.len(), 5);
        assert_eq!(counts.value(&[FACEBOOK, TOTAL_COUNT]), Some(0));
        assert_eq!(counts.value(&[TWITTER]), Some(0));
        assert_eq!(counts.value(&[FACEBOOK]), None);
        assert_eq!(counts.value(&["Reddit"]), None);
    }

    #[test]
    fn test_set_and_total() {
        let mut counts = Counts::defaults();
        counts.set(&[FACEBOOK, SHARE_COUNT], 7);
        counts.set(&[FACEBOOK, TOTAL_COUNT], 10);
        counts.set(&[TWITTER], 5);
        counts.set(&[PINTEREST], 2);

        // share_count is not part of the total, only total_count
        assert_eq!(counts.total(), 17);
    }

    #[test]
    fn test_total_saturates() {
        let mut counts = Counts::defaults();
        counts.set(&[TWITTER], u64::MAX);
        counts.set(&[PINTEREST], 1);
        counts.set(&[FACEBOOK, TOTAL_COUNT], u64::MAX);
        assert_eq!(counts.total(), u64::MAX);
    }

    #[test]
    fn test_set_replaces_leaf_with_nested() {
        let mut counts = Counts::new();
        counts.set(&["Custom"], 3);
        counts.set(&["Custom", TOTAL_COUNT], 4);
        assert_eq!(counts.value(&["Custom", TOTAL_COUNT]), Some(4));
    }

    #[test]
    fn test_counts_json_shape() {
        let mut counts = Counts::defaults();
        counts.set(&[TWITTER], 3);
        let encoded = serde_json::to_value(&counts).unwrap();
        assert_eq!(encoded["Twitter"], json!(3));
        assert_eq!(encoded["Facebook"]["like_count"], json!(0));

        let decoded: Counts = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, counts);
    }

    #[test]
    fn test_saturating_sub() {
        let mut a = Counts::defaults();
        a.set(&[FACEBOOK, TOTAL_COUNT], 13);
        a.set(&[TWITTER], 5);
        let mut b = Counts::new();
        b.set(&[FACEBOOK, TOTAL_COUNT], 3);
        b.set(&[TWITTER], 9);
        b.set(&["Reddit"], 1);

        let c = a.saturating_sub(&b);
        assert_eq!(c.value(&[FACEBOOK, TOTAL_COUNT]), Some(10));
        assert_eq!(c.value(&[TWITTER]), Some(0));
        assert_eq!(c.value(&["Reddit"]), None);
    }

    #[test]
    fn test_item_key_parse() {
        assert_eq!("site".parse::<ItemKey>().unwrap(), ItemKey::Site);
        assert_eq!("42".parse::<ItemKey>().unwrap(), ItemKey::Content(42));
        assert_eq!(
            "https://example.com/a".parse::<ItemKey>().unwrap(),
            ItemKey::Url("https://example.com/a".to_string())
        );
        assert!("post-42".parse::<ItemKey>().is_err());
        assert_eq!(ItemKey::Content(7).to_string(), "7");
    }

    #[test]
    fn test_url_hash_normalizes() {
        assert_eq!(
            url_hash("HTTPS://Example.COM"),
            url_hash(" https://example.com/ ")
        );
        assert_ne!(url_hash("https://example.com/a"), url_hash("https://example.com/b"));
        assert_eq!(url_hash("https://example.com").len(), 16);
    }

    #[test]
    fn test_http_variant() {
        assert_eq!(
            http_variant("https://example.com/post/"),
            Some("http://example.com/post/".to_string())
        );
        assert_eq!(http_variant("http://example.com/"), None);
    }

    #[test]
    fn test_absint() {
        assert_eq!(absint(&json!(12)), 12);
        assert_eq!(absint(&json!(-4)), 4);
        assert_eq!(absint(&json!(3.9)), 3);
        assert_eq!(absint(&json!("27")), 27);
        assert_eq!(absint(&json!("15 shares")), 15);
        assert_eq!(absint(&json!("-8")), 8);
        assert_eq!(absint(&json!("n/a")), 0);
        assert_eq!(absint(&json!(null)), 0);
        assert_eq!(absint(&json!(true)), 1);
    }

    #[test]
    fn test_document_defaults_from_partial_json() {
        let doc: CountDocument =
            serde_json::from_value(json!({ "counts": { "Twitter": 2 }, "total": 2 })).unwrap();
        assert_eq!(doc.last_updated, None);
        assert!(doc.groups.is_empty());
        assert!(!doc.has_data());
    }

    #[test]
    fn test_group_serialization_omits_synthetic_fields() {
        let group = CountGroup::synthetic("HTTP", Counts::new(), 0);
        let encoded = serde_json::to_value(&group).unwrap();
        assert!(encoded.get("url").is_none());
        assert!(encoded.get("disabled").is_none());
        assert!(group.is_synthetic());
        assert!(!CountGroup::tracked("Old", "https://old.example.com/").is_synthetic());
    }
}
