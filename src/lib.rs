//! Shared Counts
//!
//! A share count engine that fetches social share counts for URLs, caches them
//! against a staleness schedule tied to content age, and combines the counts
//! of several URLs belonging to one piece of content into a single total.
//!
//! # Overview
//!
//! Reads are served from the store. When stored counts are missing or stale
//! the item is queued on the request's [`CountContext`]; once the request is
//! done the queue is flushed and each queued item gets one refresh pass:
//! providers are queried, extra tracked URLs (groups) are fetched, everything
//! is summed and the document is written back.
//!
//! # Features
//!
//! - **Two provider modes**: one aggregator call (SharedCount) or the native
//!   Facebook, Pinterest, Twitter and Yummly APIs
//! - **Tiered staleness**: new content refreshes every 30 minutes, older
//!   content every few hours or days
//! - **Groups**: track old or alternate URLs of a post and roll their counts
//!   into its total, including the http spelling of https content
//! - **Deferred refresh**: reads never wait on the network unless forced
//! - **Metrics**: Prometheus counters for providers, refreshes and reads
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use shared_counts::{ContentCatalog, CountStore, CountsConfig, ItemKey, ShareCounts};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CountsConfig::from_file("shared_counts.yaml")?;
//! let catalog = ContentCatalog::from_file("content.yaml")?;
//! let engine = ShareCounts::new(Arc::new(config), CountStore::memory(), Arc::new(catalog))?;
//!
//! let mut ctx = engine.new_ctx();
//! let counts = engine.counts(&mut ctx, &ItemKey::Content(42), false).await;
//! println!("Total shares: {}", engine.total(&counts));
//!
//! // after the response has been sent
//! engine.finish(ctx).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`ShareCounts`]: public read and management API
//! - [`Aggregator`]: provider dispatch, group combination, refresh pass
//! - [`RefreshQueue`]: request-scoped set of items to refresh
//! - [`ServiceClient`]: one HTTP adapter per counting API
//! - [`StalenessPolicy`]: refresh schedule
//! - [`CountStore`]: typed persistence over a [`StoreBackend`]
//! - [`CountHooks`]: extension points around queries and totals
//! - [`ContentResolver`]: canonical URLs and publish dates of content
//!
//! # Configuration
//!
//! ```yaml
//! count_source: native            # none | sharedcount | native
//! query_services: [facebook, pinterest]
//! preserve_http: true
//! post_types: [post]
//! staleness:
//!   - { max_age: 86400, refresh_interval: 1800 }
//!   - { max_age: 432000, refresh_interval: 21600 }
//!   - { max_age: 0, refresh_interval: 432000 }
//! ```
//!
//! See [`CountsConfig`] for every option.

pub mod aggregator;
pub mod config;
pub mod content;
pub mod error;
pub mod facade;
pub mod hooks;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod service_client;
pub mod staleness;
pub mod store;

// Re-export commonly used types
pub use aggregator::{combine_totals, Aggregator, ProviderSet};
pub use config::{CountSource, CountsConfig, Endpoints, HttpConfig, Provider};
pub use content::{ContentCatalog, ContentInfo, ContentResolver};
pub use error::{CountError, Result};
pub use facade::{
    round_count, BackfillReport, CountContext, CountDisplay, CountType, ShareCounts,
};
pub use hooks::{CountHooks, DefaultHooks};
pub use metrics::{CountMetrics, ReadState};
pub use models::{CountDocument, CountGroup, CountValue, Counts, ItemKey, UrlCountRecord};
pub use queue::{FlushReport, QueuedItem, RefreshQueue};
pub use service_client::{PartialCount, ServiceClient};
pub use staleness::{StalenessPolicy, StalenessTier};
pub use store::{CountStore, FileBackend, MemoryBackend, StoreBackend};
