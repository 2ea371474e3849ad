//! Content identity resolution
//!
//! The engine does not own content. It asks a [`ContentResolver`] for an
//! item's canonical URL, publish date and type.

use crate::error::{CountError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

/// What the engine needs to know about one content item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    pub id: u64,
    /// Canonical URL
    pub url: String,
    /// Publish date, epoch seconds
    pub published_at: i64,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub title: String,
}

fn default_content_type() -> String {
    "post".to_string()
}

impl ContentInfo {
    pub fn new(id: u64, url: impl Into<String>, published_at: i64) -> Self {
        ContentInfo {
            id,
            url: url.into(),
            published_at,
            content_type: default_content_type(),
            title: String::new(),
        }
    }

    pub fn with_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Look up one item; `None` if it does not exist
    async fn resolve(&self, id: u64) -> Option<ContentInfo>;

    /// IDs of every item of the given types, newest first
    async fn list_content(&self, content_types: &[String]) -> Vec<u64>;
}

/// In-memory content catalog, optionally loaded from a YAML list
#[derive(Debug, Default)]
pub struct ContentCatalog {
    items: RwLock<BTreeMap<u64, ContentInfo>>,
}

impl ContentCatalog {
    pub fn new(items: impl IntoIterator<Item = ContentInfo>) -> Self {
        ContentCatalog {
            items: RwLock::new(items.into_iter().map(|item| (item.id, item)).collect()),
        }
    }

    /// Load a YAML sequence of [`ContentInfo`] entries
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CountError::ConfigError(format!("Failed to read content catalog: {}", e))
        })?;
        let items: Vec<ContentInfo> = serde_yaml::from_str(&content).map_err(|e| {
            CountError::ConfigError(format!("Failed to parse content catalog: {}", e))
        })?;
        Ok(Self::new(items))
    }

    pub fn insert(&self, item: ContentInfo) {
        if let Ok(mut items) = self.items.write() {
            items.insert(item.id, item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentResolver for ContentCatalog {
    async fn resolve(&self, id: u64) -> Option<ContentInfo> {
        self.items.read().ok()?.get(&id).cloned()
    }

    async fn list_content(&self, content_types: &[String]) -> Vec<u64> {
        let Ok(items) = self.items.read() else {
            return Vec::new();
        };
        let mut matching: Vec<&ContentInfo> = items
            .values()
            .filter(|item| content_types.iter().any(|t| *t == item.content_type))
            .collect();
        matching.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(a.id.cmp(&b.id)));
        matching.into_iter().map(|item| item.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ContentCatalog {
        ContentCatalog::new(vec![
            ContentInfo::new(1, "https://example.com/one/", 100),
            ContentInfo::new(2, "https://example.com/two/", 300),
            ContentInfo::new(3, "https://example.com/about/", 200).with_type("page"),
        ])
    }

    #[tokio::test]
    async fn test_resolve() {
        let catalog = catalog();
        let item = catalog.resolve(2).await.unwrap();
        assert_eq!(item.url, "https://example.com/two/");
        assert_eq!(item.content_type, "post");
        assert!(catalog.resolve(9).await.is_none());
    }

    #[tokio::test]
    async fn test_list_content_filters_and_orders() {
        let catalog = catalog();
        assert_eq!(catalog.list_content(&["post".to_string()]).await, vec![2, 1]);
        assert_eq!(
            catalog
                .list_content(&["post".to_string(), "page".to_string()])
                .await,
            vec![2, 3, 1]
        );
        assert!(catalog.list_content(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_insert() {
        let catalog = ContentCatalog::default();
        assert!(catalog.is_empty());
        catalog.insert(ContentInfo::new(5, "https://example.com/five/", 1).with_title("Five"));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.resolve(5).await.unwrap().title, "Five");
    }

    #[test]
    fn test_parse_yaml_catalog() {
        let yaml = r#"
- id: 10
  url: https://example.com/ten/
  published_at: 1700000000
- id: 11
  url: https://example.com/eleven/
  published_at: 1700000100
  content_type: recipe
"#;
        let items: Vec<ContentInfo> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].content_type, "recipe");
    }
}
