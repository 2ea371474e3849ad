//! Extension points around count fetching and totals
//!
//! Every method has a default, so an implementation only overrides what it
//! needs. Hooks run inline inside refresh passes and reads and must not block.

use crate::config::Provider;
use crate::models::{Counts, ItemKey};

pub trait CountHooks: Send + Sync {
    /// Zeroed counts every query starts from
    fn default_counts(&self, _key: &ItemKey, _url: &str) -> Counts {
        Counts::defaults()
    }

    /// Native services to query for `url`; remove entries to bypass them
    fn query_services(&self, services: Vec<Provider>, _url: &str) -> Vec<Provider> {
        services
    }

    /// Adjust provider results or merge counts from other sources
    fn after_query(&self, counts: Counts, _key: &ItemKey, _url: &str) -> Counts {
        counts
    }

    /// Adjust or replace a computed grand total
    fn adjust_total(&self, total: u64, _counts: &Counts) -> u64 {
        total
    }

    /// Value of a count type the engine does not know
    fn custom_count(&self, _kind: &str, _counts: &Counts, _key: &ItemKey) -> u64 {
        0
    }

    /// Whether the http spelling of this item should keep being tracked when
    /// the preserve-http policy is on
    fn preserve_http(&self, _key: &ItemKey) -> bool {
        true
    }
}

/// Hooks that leave every value unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl CountHooks for DefaultHooks {}
