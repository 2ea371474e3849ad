//! Provider dispatch, group combination and the per-item refresh pass

use crate::config::{CountSource, CountsConfig, Provider};
use crate::content::ContentResolver;
use crate::error::{CountError, Result};
use crate::hooks::CountHooks;
use crate::metrics::CountMetrics;
use crate::models::{
    http_variant, now_epoch, CountGroup, CountValue, Counts, ItemKey, UrlCountRecord, HTTPS_GROUP,
    HTTP_GROUP,
};
use crate::service_client::ServiceClient;
use crate::store::CountStore;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Providers left out of one query
pub type ProviderSet = HashSet<Provider>;

/// Fetches counts for URLs and writes merged results to the store
pub struct Aggregator {
    config: Arc<CountsConfig>,
    client: ServiceClient,
    store: CountStore,
    resolver: Arc<dyn ContentResolver>,
    hooks: Arc<dyn CountHooks>,
    metrics: CountMetrics,
}

impl Aggregator {
    /// Create a new Aggregator
    ///
    /// # Arguments
    /// * `config` - Engine configuration (count source, services, endpoints)
    /// * `store` - Where refreshed documents are written
    /// * `resolver` - Canonical URLs and publish dates of content items
    /// * `hooks` - Extension points applied to every query
    /// * `metrics` - Provider and refresh metrics
    pub fn new(
        config: Arc<CountsConfig>,
        store: CountStore,
        resolver: Arc<dyn ContentResolver>,
        hooks: Arc<dyn CountHooks>,
        metrics: CountMetrics,
    ) -> Result<Self> {
        let client = ServiceClient::new(&config.http, config.endpoints.clone(), metrics.clone())?;

        Ok(Aggregator {
            config,
            client,
            store,
            resolver,
            hooks,
            metrics,
        })
    }

    pub fn config(&self) -> &CountsConfig {
        &self.config
    }

    pub fn store(&self) -> &CountStore {
        &self.store
    }

    /// Canonical URL of an item
    pub async fn resolve_url(&self, key: &ItemKey) -> Result<String> {
        match key {
            ItemKey::Content(id) => self
                .resolver
                .resolve(*id)
                .await
                .map(|info| info.url)
                .ok_or_else(|| CountError::UnknownItem(id.to_string())),
            ItemKey::Site => Ok(self.config.site_url.clone()),
            ItemKey::Url(url) => Ok(url.clone()),
        }
    }

    /// Query the configured providers for one URL
    ///
    /// Starts from the default counts and overwrites only the fields a
    /// provider actually reported. Providers in `skip` are not called.
    pub async fn query(&self, key: &ItemKey, url: &str, skip: &ProviderSet) -> Counts {
        let mut counts = self.hooks.default_counts(key, url);

        match self.config.count_source {
            CountSource::None => {}
            CountSource::SharedCount => self.query_sharedcount(url, skip, &mut counts).await,
            CountSource::Native => self.query_native(url, skip, &mut counts).await,
        }

        self.hooks.after_query(counts, key, url)
    }

    async fn query_sharedcount(&self, url: &str, skip: &ProviderSet, counts: &mut Counts) {
        let api_key = self.config.sharedcount_key.trim();
        if api_key.is_empty() {
            warn!("sharedcount mode without an API key, keeping default counts");
            return;
        }

        if !skip.contains(&Provider::SharedCount) {
            if let Some(partial) = self.client.fetch_sharedcount(url, api_key).await {
                partial.apply_to(counts);
            }
        }

        if self.config.twitter_counts && !skip.contains(&Provider::Twitter) {
            if let Some(partial) = self.client.fetch_twitter(url).await {
                partial.apply_to(counts);
            }
        }

        if self.config.yummly_counts && !skip.contains(&Provider::Yummly) {
            if let Some(partial) = self.client.fetch_yummly(url).await {
                partial.apply_to(counts);
            }
        }
    }

    async fn query_native(&self, url: &str, skip: &ProviderSet, counts: &mut Counts) {
        let services = self
            .hooks
            .query_services(self.config.query_services.clone(), url);

        for provider in services {
            if skip.contains(&provider) {
                debug!("Skipping provider={} for url={}", provider, url);
                continue;
            }

            let partial = match provider {
                Provider::Facebook => {
                    let token = Some(self.config.fb_access_token.as_str());
                    self.client.fetch_facebook(url, token).await
                }
                Provider::Pinterest => self.client.fetch_pinterest(url).await,
                Provider::Twitter => self.client.fetch_twitter(url).await,
                Provider::Yummly => self.client.fetch_yummly(url).await,
                Provider::SharedCount => {
                    debug!("Ignoring aggregator provider in native mode");
                    None
                }
            };

            if let Some(partial) = partial {
                partial.apply_to(counts);
            }
        }
    }

    /// Refresh one item at its canonical URL
    ///
    /// # Returns
    /// * `Ok(Some(counts))` - the merged counts that were stored
    /// * `Ok(None)` - counting is disabled, nothing was written
    /// * `Err(CountError)` - the item is unknown or the store failed
    pub async fn refresh_item(&self, key: &ItemKey) -> Result<Option<Counts>> {
        if !self.config.counts_enabled() {
            return Ok(None);
        }
        let url = self.resolve_url(key).await?;
        self.refresh_url(key, &url).await
    }

    /// Refresh one item whose URL is already known.
    ///
    /// Every stored field is overwritten, so running the pass twice leaves the
    /// same document behind.
    pub async fn refresh_url(&self, key: &ItemKey, url: &str) -> Result<Option<Counts>> {
        if !self.config.counts_enabled() {
            debug!("Counting disabled, skipping refresh of item={}", key);
            self.metrics.record_refresh("skipped", Duration::ZERO);
            return Ok(None);
        }

        let start = Instant::now();
        let result = match key {
            ItemKey::Content(id) => self.refresh_content(*id, url).await,
            ItemKey::Site | ItemKey::Url(_) => self.refresh_record(key, url).await,
        };

        match &result {
            Ok(counts) => {
                self.metrics.record_refresh("success", start.elapsed());
                info!(
                    "Refreshed item={} url={} total={} elapsed_ms={}",
                    key,
                    url,
                    counts.total(),
                    start.elapsed().as_millis()
                );
            }
            Err(e) => {
                self.metrics.record_refresh("failure", start.elapsed());
                warn!("Refresh of item={} failed: {}", key, e);
            }
        }

        result.map(Some)
    }

    async fn refresh_record(&self, key: &ItemKey, url: &str) -> Result<Counts> {
        let counts = self.query(key, url, &ProviderSet::new()).await;
        let record = UrlCountRecord {
            total: self.total(&counts),
            count: counts.clone(),
            datetime: now_epoch(),
            url: url.to_string(),
        };
        self.store.put_url(&record).await?;
        Ok(counts)
    }

    async fn refresh_content(&self, id: u64, url: &str) -> Result<Counts> {
        let key = ItemKey::Content(id);

        let targets: Vec<(String, String)> = self
            .store
            .get(id)
            .await?
            .map(|doc| {
                doc.refreshable_groups()
                    .filter_map(|(slug, group)| {
                        group.url.as_ref().map(|url| (slug.clone(), url.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let primary = self.query(&key, url, &ProviderSet::new()).await;

        // Twitter reports the same number for both schemes
        let http = match self.preserves_http(&key, url) {
            Some(http_url) => {
                let skip = ProviderSet::from([Provider::Twitter]);
                Some(self.query(&key, &http_url, &skip).await)
            }
            None => None,
        };

        let mut fetched: BTreeMap<String, (String, Counts)> = BTreeMap::new();
        for (slug, group_url) in targets {
            let counts = self.query(&key, &group_url, &ProviderSet::new()).await;
            fetched.insert(slug, (group_url, counts));
        }

        // Re-read so group edits made during the fetch are not lost
        let mut doc = self.store.get(id).await?.unwrap_or_default();
        if doc.content_date.is_none() {
            doc.content_date = self.resolver.resolve(id).await.map(|info| info.published_at);
        }

        doc.groups.retain(|_, group| !group.is_synthetic());
        let mut merge = Vec::with_capacity(doc.groups.len() + 2);
        match http {
            Some(http) => {
                doc.groups.insert(
                    HTTPS_GROUP.to_string(),
                    CountGroup::synthetic("HTTPS", primary.clone(), self.total(&primary)),
                );
                doc.groups.insert(
                    HTTP_GROUP.to_string(),
                    CountGroup::synthetic("HTTP", http.clone(), self.total(&http)),
                );
                merge.push(primary);
                merge.push(http);
            }
            None => merge.push(primary),
        }

        for (slug, (group_url, counts)) in fetched {
            match doc.groups.get_mut(&slug) {
                Some(group) if !group.disabled && group.url.as_deref() == Some(group_url.as_str()) => {
                    group.total = self.total(&counts);
                    group.counts = counts;
                }
                _ => debug!("Group slug={} changed during refresh of item={}", slug, id),
            }
        }

        merge.extend(
            doc.groups
                .values()
                .filter(|group| !group.is_synthetic())
                .map(|group| group.counts.clone()),
        );

        doc.counts = combine_totals(&merge);
        doc.total = self.total(&doc.counts);
        doc.last_updated = Some(now_epoch());

        self.store.put(id, &doc).await?;
        Ok(doc.counts)
    }

    /// The http URL to track alongside `url`, when the preserve-http policy
    /// applies to this item
    fn preserves_http(&self, key: &ItemKey, url: &str) -> Option<String> {
        if !self.config.preserve_http || !self.hooks.preserve_http(key) {
            return None;
        }
        http_variant(url)
    }

    fn total(&self, counts: &Counts) -> u64 {
        self.hooks.adjust_total(counts.total(), counts)
    }
}

/// Sum several counts mappings field by field.
///
/// The result has the union of the inputs' keys; a leaf missing from one input
/// counts as zero there. When inputs disagree on whether a key is a leaf or a
/// nested mapping, the kind seen first is kept and the other values are
/// ignored. An empty list yields empty counts.
pub fn combine_totals(list: &[Counts]) -> Counts {
    let mut combined = Counts::new();
    for counts in list {
        add_into(&mut combined, counts);
    }
    combined
}

fn add_into(target: &mut Counts, source: &Counts) {
    for (key, value) in source.iter() {
        if target.get(key).is_none() {
            target.insert(key.clone(), value.clone());
            continue;
        }

        match (target.get_mut(key), value) {
            (Some(CountValue::Count(sum)), CountValue::Count(n)) => *sum = sum.saturating_add(*n),
            (Some(CountValue::Nested(sum)), CountValue::Nested(inner)) => add_into(sum, inner),
            _ => {}
        }
    }
}
