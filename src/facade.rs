//! Public read and management API
//!
//! [`ShareCounts`] ties the store, the staleness policy and the aggregator
//! together. Reads never fail and never wait on the network unless forced;
//! stale or missing items go onto the request's [`RefreshQueue`] and are
//! refreshed when the request context is finished.

use crate::aggregator::Aggregator;
use crate::config::CountsConfig;
use crate::content::ContentResolver;
use crate::error::{CountError, Result};
use crate::hooks::{CountHooks, DefaultHooks};
use crate::metrics::{CountMetrics, ReadState};
use crate::models::{
    now_epoch, CountDocument, CountGroup, Counts, ItemKey, COMMENT_COUNT, FACEBOOK, LIKE_COUNT,
    LINKEDIN, PINTEREST, SHARE_COUNT, TOTAL_COUNT, TWITTER, YUMMLY,
};
use crate::queue::{FlushReport, RefreshQueue};
use crate::staleness::StalenessPolicy;
use crate::store::CountStore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A single value that can be pulled out of an item's counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountType {
    Facebook,
    FacebookLikes,
    FacebookShares,
    FacebookComments,
    Twitter,
    Pinterest,
    Yummly,
    LinkedIn,
    /// Sum over the configured `included_services`
    IncludedTotal,
    /// Printing is not counted; always 0
    Print,
    Total,
    /// Resolved by [`CountHooks::custom_count`]
    Custom(String),
}

impl From<&str> for CountType {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "facebook" => CountType::Facebook,
            "facebook_likes" => CountType::FacebookLikes,
            "facebook_shares" => CountType::FacebookShares,
            "facebook_comments" => CountType::FacebookComments,
            "twitter" => CountType::Twitter,
            "pinterest" => CountType::Pinterest,
            "yummly" => CountType::Yummly,
            "linkedin" => CountType::LinkedIn,
            "included_total" => CountType::IncludedTotal,
            "print" => CountType::Print,
            "total" => CountType::Total,
            _ => CountType::Custom(name.trim().to_string()),
        }
    }
}

/// A count ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountDisplay {
    Exact(u64),
    /// Rounded and suffixed, e.g. `1.5k`
    Abbreviated(String),
}

impl CountDisplay {
    pub fn as_exact(&self) -> Option<u64> {
        match self {
            CountDisplay::Exact(n) => Some(*n),
            CountDisplay::Abbreviated(_) => None,
        }
    }
}

impl fmt::Display for CountDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountDisplay::Exact(n) => write!(f, "{}", n),
            CountDisplay::Abbreviated(s) => f.write_str(s),
        }
    }
}

/// Round to `digits` significant figures and abbreviate with `k`/`m`.
///
/// Values below 1000 are returned unchanged, as is everything when `digits`
/// is 0. Halves round up.
pub fn round_count(n: u64, digits: u32) -> CountDisplay {
    if n < 1000 || digits == 0 {
        return CountDisplay::Exact(n);
    }

    let length = n.to_string().len() as u32;
    let rounded = if length <= digits {
        n
    } else {
        let divisor = 10u64.pow(length - digits);
        (n.saturating_add(divisor / 2) / divisor).saturating_mul(divisor)
    };

    if rounded >= 1_000_000 {
        CountDisplay::Abbreviated(format!("{}m", rounded as f64 / 1_000_000.0))
    } else {
        CountDisplay::Abbreviated(format!("{}k", rounded as f64 / 1_000.0))
    }
}

/// Request scope: owns the refresh queue filled by reads
#[derive(Debug, Default)]
pub struct CountContext {
    queue: RefreshQueue,
}

impl CountContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &RefreshQueue {
        &self.queue
    }

    /// Number of items waiting for the end-of-request flush
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Result of a backfill run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Items that already had counts
    pub existing: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Where an item lives and how old its content is
struct ReadTarget {
    url: String,
    content_date: Option<i64>,
}

/// What the store currently holds for an item
#[derive(Default)]
struct Snapshot {
    counts: Option<Counts>,
    last_updated: Option<i64>,
    content_date: Option<i64>,
}

/// Share count engine
pub struct ShareCounts {
    config: Arc<CountsConfig>,
    aggregator: Aggregator,
    store: CountStore,
    resolver: Arc<dyn ContentResolver>,
    hooks: Arc<dyn CountHooks>,
    policy: StalenessPolicy,
    metrics: CountMetrics,
}

impl ShareCounts {
    /// Create an engine with default hooks and a private metrics registry
    pub fn new(
        config: Arc<CountsConfig>,
        store: CountStore,
        resolver: Arc<dyn ContentResolver>,
    ) -> Result<Self> {
        let metrics = CountMetrics::new()
            .map_err(|e| CountError::ConfigError(format!("Failed to register metrics: {}", e)))?;
        Self::with_hooks(config, store, resolver, Arc::new(DefaultHooks), metrics)
    }

    /// Create an engine with custom hooks and metrics
    ///
    /// # Arguments
    /// * `config` - Validated engine configuration
    /// * `store` - Count persistence
    /// * `resolver` - Content URLs, dates and types
    /// * `hooks` - Extension points
    /// * `metrics` - Metrics shared with the caller's registry
    pub fn with_hooks(
        config: Arc<CountsConfig>,
        store: CountStore,
        resolver: Arc<dyn ContentResolver>,
        hooks: Arc<dyn CountHooks>,
        metrics: CountMetrics,
    ) -> Result<Self> {
        config.validate()?;
        let policy = StalenessPolicy::new(config.staleness.clone())?;
        let aggregator = Aggregator::new(
            Arc::clone(&config),
            store.clone(),
            Arc::clone(&resolver),
            Arc::clone(&hooks),
            metrics.clone(),
        )?;

        Ok(ShareCounts {
            config,
            aggregator,
            store,
            resolver,
            hooks,
            policy,
            metrics,
        })
    }

    /// Create a new request context
    pub fn new_ctx(&self) -> CountContext {
        CountContext::new()
    }

    pub fn config(&self) -> &CountsConfig {
        &self.config
    }

    pub fn metrics(&self) -> &CountMetrics {
        &self.metrics
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Counts of an item.
    ///
    /// Stale or missing counts are queued on `ctx` and the stored value (empty
    /// counts if there is none) is returned straight away. With `force` the
    /// item is refreshed before reading; if that fails the stored value is
    /// returned. Content the resolver does not know, or of a type without
    /// share counts, yields empty counts.
    pub async fn counts(&self, ctx: &mut CountContext, key: &ItemKey, force: bool) -> Counts {
        let Some(target) = self.read_target(key).await else {
            return Counts::new();
        };

        let snapshot = self.load(key, &target.url).await;
        let content_date = snapshot.content_date.or(target.content_date);
        let state = match snapshot.counts {
            None => ReadState::Missing,
            Some(_) if self.policy.needs_refresh(snapshot.last_updated, content_date, now_epoch()) => {
                ReadState::Stale
            }
            Some(_) => ReadState::Fresh,
        };
        self.metrics.record_read(state);

        if force {
            match self.aggregator.refresh_url(key, &target.url).await {
                Ok(Some(_)) => {
                    return self.load(key, &target.url).await.counts.unwrap_or_default();
                }
                Ok(None) => debug!("Forced read of item={} with counting disabled", key),
                Err(e) => warn!("Forced refresh of item={} failed, serving stored counts: {}", key, e),
            }
        } else if state != ReadState::Fresh
            && self.config.counts_enabled()
            && ctx.queue.enqueue(key.clone(), target.url)
        {
            self.metrics.record_enqueue();
        }

        snapshot.counts.unwrap_or_default()
    }

    /// A single count of an item, optionally rounded for display.
    ///
    /// Rounding applies only to values of 1000 and above and only when `round`
    /// asks for at least one significant digit.
    pub async fn count(
        &self,
        ctx: &mut CountContext,
        key: &ItemKey,
        kind: &CountType,
        round: Option<u32>,
    ) -> CountDisplay {
        let counts = self.counts(ctx, key, false).await;
        let value = self.count_value(&counts, key, kind);

        match round {
            Some(digits) if digits > 0 && value >= 1000 => round_count(value, digits),
            _ => CountDisplay::Exact(value),
        }
    }

    /// Value of one count type within `counts`; anything missing is 0
    pub fn count_value(&self, counts: &Counts, key: &ItemKey, kind: &CountType) -> u64 {
        if counts.is_empty() {
            return 0;
        }

        let leaf = |path: &[&str]| counts.value(path).unwrap_or(0);
        match kind {
            CountType::Facebook => leaf(&[FACEBOOK, TOTAL_COUNT]),
            CountType::FacebookLikes => leaf(&[FACEBOOK, LIKE_COUNT]),
            CountType::FacebookShares => leaf(&[FACEBOOK, SHARE_COUNT]),
            CountType::FacebookComments => leaf(&[FACEBOOK, COMMENT_COUNT]),
            CountType::Twitter => leaf(&[TWITTER]),
            CountType::Pinterest => leaf(&[PINTEREST]),
            CountType::Yummly => leaf(&[YUMMLY]),
            CountType::LinkedIn => leaf(&[LINKEDIN]),
            CountType::IncludedTotal => self
                .config
                .included_services
                .iter()
                .map(|service| CountType::from(service.as_str()))
                .filter(|service| *service != CountType::IncludedTotal)
                .map(|service| self.count_value(counts, key, &service))
                .fold(0u64, u64::saturating_add),
            CountType::Print => 0,
            CountType::Total => self.total(counts),
            CountType::Custom(name) => self.hooks.custom_count(name, counts, key),
        }
    }

    /// Grand total of `counts` after the total hook
    pub fn total(&self, counts: &Counts) -> u64 {
        self.hooks.adjust_total(counts.total(), counts)
    }

    /// Refresh everything queued on `ctx` before returning
    pub async fn finish(&self, mut ctx: CountContext) -> FlushReport {
        if ctx.queue.is_empty() {
            return FlushReport::default();
        }
        ctx.queue.flush(&self.aggregator).await
    }

    /// Refresh everything queued on `ctx` on a background task
    pub fn spawn_finish(self: &Arc<Self>, ctx: CountContext) -> JoinHandle<FlushReport> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.finish(ctx).await })
    }

    /// Stored document of a content item
    pub async fn document(&self, id: u64) -> Result<Option<CountDocument>> {
        self.store.get(id).await
    }

    /// Track another URL for a content item
    ///
    /// # Returns
    /// * `Ok(slug)` - the generated group slug
    /// * `Err(CountError)` - the item is unknown, the URL invalid or the store failed
    pub async fn add_group(&self, id: u64, name: &str, url: &str) -> Result<String> {
        let url = validate_group_url(url)?;
        if self.resolver.resolve(id).await.is_none() {
            return Err(CountError::UnknownItem(id.to_string()));
        }

        let name = match name.trim() {
            "" => url.clone(),
            name => name.to_string(),
        };

        let slug = self
            .store
            .update(id, |doc| {
                let slug = unique_slug(&doc.groups);
                doc.groups
                    .insert(slug.clone(), CountGroup::tracked(name, url.clone()));
                // picked up by the next read
                doc.last_updated = None;
                Ok(slug)
            })
            .await?;

        info!("Added count group slug={} to item={} url={}", slug, id, url);
        Ok(slug)
    }

    /// Remove a tracked URL and its counts from a content item
    pub async fn delete_group(&self, id: u64, slug: &str) -> Result<()> {
        let group = self.store.delete_group(id, slug, self.hooks.as_ref()).await?;
        info!(
            "Deleted count group slug={} from item={} total={}",
            slug, id, group.total
        );
        Ok(())
    }

    /// Stop or resume refreshing one tracked URL; its counts stay in the total
    pub async fn set_group_disabled(&self, id: u64, slug: &str, disabled: bool) -> Result<()> {
        self.store
            .update(id, |doc| match doc.groups.get_mut(slug) {
                Some(group) if group.is_synthetic() => {
                    Err(CountError::ProtectedGroup(slug.to_string()))
                }
                Some(group) => {
                    group.disabled = disabled;
                    Ok(())
                }
                None => Err(CountError::UnknownGroup {
                    item: id.to_string(),
                    slug: slug.to_string(),
                }),
            })
            .await?;

        debug!("Set group slug={} on item={} disabled={}", slug, id, disabled);
        Ok(())
    }

    /// Refresh one item now and return what was stored
    pub async fn update_item(&self, key: &ItemKey) -> Result<Counts> {
        if !self.config.counts_enabled() {
            return Err(CountError::NoCountSource);
        }

        let target = match key {
            ItemKey::Content(id) => {
                let info = self
                    .resolver
                    .resolve(*id)
                    .await
                    .ok_or_else(|| CountError::UnknownItem(id.to_string()))?;
                if !self.config.supports_type(&info.content_type) {
                    return Err(CountError::Unsupported(format!(
                        "content type '{}'",
                        info.content_type
                    )));
                }
                info.url
            }
            _ => self.aggregator.resolve_url(key).await?,
        };

        self.aggregator
            .refresh_url(key, &target)
            .await?
            .ok_or(CountError::NoCountSource)?;

        Ok(self.load(key, &target).await.counts.unwrap_or_default())
    }

    /// Make sure up to `target` items of the counted types have counts,
    /// refreshing at most `batch` of them in this call
    pub async fn backfill(&self, target: usize, batch: usize) -> Result<BackfillReport> {
        if !self.config.counts_enabled() {
            return Err(CountError::NoCountSource);
        }

        let ids = self.resolver.list_content(&self.config.post_types).await;
        let mut report = BackfillReport::default();
        let mut missing = Vec::new();
        for id in ids {
            match self.store.get(id).await? {
                Some(doc) if doc.has_data() => report.existing += 1,
                _ => missing.push(id),
            }
        }

        let wanted = target.saturating_sub(report.existing).min(batch);
        debug!(
            "Backfill existing={} missing={} wanted={}",
            report.existing,
            missing.len(),
            wanted
        );

        for id in missing.into_iter().take(wanted) {
            match self.aggregator.refresh_item(&ItemKey::Content(id)).await {
                Ok(_) => report.refreshed += 1,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!("Backfill of item={} failed: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Backfill finished existing={} refreshed={} failed={}",
            report.existing, report.refreshed, report.failed
        );
        Ok(report)
    }

    /// Content items with the highest stored totals, highest first
    pub async fn popular(&self, limit: usize) -> Result<Vec<(u64, u64)>> {
        let mut totals = Vec::new();
        for id in self.store.content_ids().await? {
            if let Some(doc) = self.store.get(id).await? {
                totals.push((id, doc.total));
            }
        }
        totals.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        totals.truncate(limit);
        Ok(totals)
    }

    /// Remove every stored count
    pub async fn reset(&self) -> Result<()> {
        self.store.clear().await
    }

    async fn read_target(&self, key: &ItemKey) -> Option<ReadTarget> {
        match key {
            ItemKey::Content(id) => {
                let Some(info) = self.resolver.resolve(*id).await else {
                    debug!("Unknown content item={}", id);
                    return None;
                };
                if !self.config.supports_type(&info.content_type) {
                    debug!("Item={} has type={} without counts", id, info.content_type);
                    return None;
                }
                Some(ReadTarget {
                    url: info.url,
                    content_date: Some(info.published_at),
                })
            }
            ItemKey::Site => Some(ReadTarget {
                url: self.config.site_url.clone(),
                content_date: None,
            }),
            ItemKey::Url(url) => Some(ReadTarget {
                url: url.clone(),
                content_date: None,
            }),
        }
    }

    async fn load(&self, key: &ItemKey, url: &str) -> Snapshot {
        match key {
            ItemKey::Content(id) => match self.store.get(*id).await {
                Ok(Some(doc)) => Snapshot {
                    counts: (!doc.counts.is_empty()).then_some(doc.counts),
                    last_updated: doc.last_updated,
                    content_date: doc.content_date,
                },
                Ok(None) => Snapshot::default(),
                Err(e) => {
                    warn!("Failed to read counts of item={}: {}", key, e);
                    Snapshot::default()
                }
            },
            ItemKey::Site | ItemKey::Url(_) => match self.store.get_url(url).await {
                Ok(Some(record)) => Snapshot {
                    counts: Some(record.count),
                    last_updated: Some(record.datetime),
                    content_date: None,
                },
                Ok(None) => Snapshot::default(),
                Err(e) => {
                    warn!("Failed to read counts of url={}: {}", url, e);
                    Snapshot::default()
                }
            },
        }
    }
}

fn validate_group_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| CountError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.trim().to_string()),
        scheme => Err(CountError::InvalidUrl(format!(
            "{}: unsupported scheme '{}'",
            raw, scheme
        ))),
    }
}

/// Hex slug derived from the current time, bumped until it is unused
fn unique_slug(existing: &BTreeMap<String, CountGroup>) -> String {
    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    loop {
        let slug = format!("{:013x}", seed);
        if !existing.contains_key(&slug) {
            return slug;
        }
        seed = seed.wrapping_add(1);
    }
}
