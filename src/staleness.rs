//! Refresh scheduling based on content age

use crate::error::{CountError, Result};
use serde::{Deserialize, Serialize};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// One rule of the refresh schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessTier {
    /// Content younger than this many seconds matches the tier; 0 matches any age
    pub max_age: u64,
    /// Counts older than this many seconds are refetched
    pub refresh_interval: u64,
}

impl StalenessTier {
    pub fn new(max_age: u64, refresh_interval: u64) -> Self {
        StalenessTier {
            max_age,
            refresh_interval,
        }
    }

    fn matches(&self, content_date: Option<i64>, now: i64) -> bool {
        if self.max_age == 0 {
            return true;
        }
        match content_date {
            Some(date) => date > now.saturating_sub(self.max_age as i64),
            None => false,
        }
    }
}

/// Decides whether stored counts must be refetched.
///
/// Tiers are evaluated in order and the first whose age threshold the content
/// satisfies supplies the refresh interval. Newer content is refreshed more
/// often because that is when its counts move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessPolicy {
    tiers: Vec<StalenessTier>,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        StalenessPolicy {
            tiers: Self::default_tiers(),
        }
    }
}

impl StalenessPolicy {
    /// Build a policy from an ordered schedule.
    ///
    /// The schedule must be non-empty, every interval must be non-zero and the
    /// last tier must be the zero-age fallback so every item matches a tier.
    pub fn new(tiers: Vec<StalenessTier>) -> Result<Self> {
        let Some(last) = tiers.last() else {
            return Err(CountError::ConfigError(
                "staleness schedule must contain at least one tier".to_string(),
            ));
        };

        if last.max_age != 0 {
            return Err(CountError::ConfigError(
                "last staleness tier must have max_age 0 (matches any age)".to_string(),
            ));
        }

        if let Some(tier) = tiers.iter().find(|t| t.refresh_interval == 0) {
            return Err(CountError::ConfigError(format!(
                "staleness tier with max_age {} has a zero refresh_interval",
                tier.max_age
            )));
        }

        Ok(StalenessPolicy { tiers })
    }

    /// 30 minutes under a day old, 6 hours under five days, 5 days otherwise
    pub fn default_tiers() -> Vec<StalenessTier> {
        vec![
            StalenessTier::new(DAY, 30 * MINUTE),
            StalenessTier::new(5 * DAY, 6 * HOUR),
            StalenessTier::new(0, 5 * DAY),
        ]
    }

    pub fn tiers(&self) -> &[StalenessTier] {
        &self.tiers
    }

    /// Refresh interval applying to content published at `content_date`.
    ///
    /// Items without a content date (the site, arbitrary URLs) only match the
    /// zero-age fallback.
    pub fn interval_for(&self, content_date: Option<i64>, now: i64) -> Option<u64> {
        self.tiers
            .iter()
            .find(|tier| tier.matches(content_date, now))
            .map(|tier| tier.refresh_interval)
    }

    /// Whether counts last fetched at `last_updated` are stale at `now`.
    ///
    /// Missing `last_updated` is always stale. Reaching the interval exactly
    /// counts as stale.
    pub fn needs_refresh(&self, last_updated: Option<i64>, content_date: Option<i64>, now: i64) -> bool {
        let Some(last_updated) = last_updated else {
            return true;
        };

        match self.interval_for(content_date, now) {
            Some(interval) => now.saturating_sub(last_updated) >= interval as i64,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn ago(secs: u64) -> Option<i64> {
        Some(NOW - secs as i64)
    }

    #[test]
    fn test_missing_last_updated_is_stale() {
        let policy = StalenessPolicy::default();
        assert!(policy.needs_refresh(None, ago(10 * DAY), NOW));
        assert!(policy.needs_refresh(None, None, NOW));
    }

    #[test]
    fn test_fresh_content_tier() {
        let policy = StalenessPolicy::default();
        let published = ago(2 * HOUR);
        assert!(!policy.needs_refresh(ago(10 * MINUTE), published, NOW));
        assert!(policy.needs_refresh(ago(31 * MINUTE), published, NOW));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let policy = StalenessPolicy::default();
        let published = ago(2 * HOUR);
        assert!(policy.needs_refresh(ago(30 * MINUTE), published, NOW));
        assert!(!policy.needs_refresh(ago(30 * MINUTE - 1), published, NOW));
    }

    #[test]
    fn test_middle_tier() {
        let policy = StalenessPolicy::default();
        let published = ago(3 * DAY);
        assert_eq!(policy.interval_for(published, NOW), Some(6 * HOUR));
        assert!(!policy.needs_refresh(ago(5 * HOUR), published, NOW));
        assert!(policy.needs_refresh(ago(7 * HOUR), published, NOW));
    }

    #[test]
    fn test_old_content_tier() {
        let policy = StalenessPolicy::default();
        let published = ago(10 * DAY);
        assert!(policy.needs_refresh(ago(6 * DAY), published, NOW));
        assert!(!policy.needs_refresh(ago(2 * HOUR), published, NOW));
    }

    #[test]
    fn test_undated_items_use_fallback() {
        let policy = StalenessPolicy::default();
        assert_eq!(policy.interval_for(None, NOW), Some(5 * DAY));
        assert!(!policy.needs_refresh(ago(4 * DAY), None, NOW));
    }

    #[test]
    fn test_custom_schedule_first_match_wins() {
        let policy = StalenessPolicy::new(vec![
            StalenessTier::new(HOUR, MINUTE),
            StalenessTier::new(DAY, HOUR),
            StalenessTier::new(0, DAY),
        ])
        .unwrap();
        assert_eq!(policy.interval_for(ago(30 * MINUTE), NOW), Some(MINUTE));
        assert_eq!(policy.interval_for(ago(2 * HOUR), NOW), Some(HOUR));
        assert_eq!(policy.interval_for(ago(2 * DAY), NOW), Some(DAY));
    }

    #[test]
    fn test_invalid_schedules() {
        assert!(StalenessPolicy::new(vec![]).is_err());
        assert!(StalenessPolicy::new(vec![StalenessTier::new(DAY, HOUR)]).is_err());
        assert!(StalenessPolicy::new(vec![StalenessTier::new(0, 0)]).is_err());
    }
}
