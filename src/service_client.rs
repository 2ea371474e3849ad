//! HTTP adapters for the share counting APIs
//!
//! Every adapter issues a single GET and turns the response into a
//! [`PartialCount`]: the fields that provider legitimately reported. Failures
//! of any kind (network, non-2xx status, malformed body, missing field) yield
//! `None` and are only logged, so a slow or broken provider never costs more
//! than its own counts.

use crate::config::{Endpoints, HttpConfig, Provider};
use crate::error::{CountError, Result};
use crate::metrics::CountMetrics;
use crate::models::{
    absint, Counts, COMMENT_COUNT, FACEBOOK, LIKE_COUNT, LINKEDIN, PINTEREST, SHARE_COUNT,
    TOTAL_COUNT, TWITTER, YUMMLY,
};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

/// Fields reported by one provider call, addressed by path into [`Counts`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialCount {
    fields: Vec<(Vec<String>, u64)>,
    /// Recompute Facebook likes and total from the merged share and comment counts
    facebook_totals: bool,
}

impl PartialCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: &[&str], value: u64) {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        match self.fields.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((path, value)),
        }
    }

    pub fn with(mut self, path: &[&str], value: u64) -> Self {
        self.set(path, value);
        self
    }

    pub fn get(&self, path: &[&str]) -> Option<u64> {
        self.fields
            .iter()
            .find(|(p, _)| p.iter().map(String::as_str).eq(path.iter().copied()))
            .map(|(_, v)| *v)
    }

    /// Derive `like_count` and `total_count` when applied
    pub fn with_facebook_totals(mut self) -> Self {
        self.facebook_totals = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.facebook_totals
    }

    /// Overwrite the reported fields in `counts`, leaving the rest untouched.
    ///
    /// Facebook likes mirror shares and the total is shares plus comments,
    /// taking whatever share and comment values `counts` holds afterwards.
    pub fn apply_to(&self, counts: &mut Counts) {
        for (path, value) in &self.fields {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            counts.set(&path, *value);
        }

        if self.facebook_totals {
            let share = counts.value(&[FACEBOOK, SHARE_COUNT]).unwrap_or(0);
            let comment = counts.value(&[FACEBOOK, COMMENT_COUNT]).unwrap_or(0);
            counts.set(&[FACEBOOK, LIKE_COUNT], share);
            counts.set(&[FACEBOOK, TOTAL_COUNT], share.saturating_add(comment));
        }
    }
}

/// Issues requests against the configured counting APIs
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
    endpoints: Endpoints,
    metrics: CountMetrics,
}

impl ServiceClient {
    /// Create a ServiceClient from the HTTP settings and endpoints
    pub fn new(http: &HttpConfig, endpoints: Endpoints, metrics: CountMetrics) -> Result<Self> {
        let client = Client::builder()
            .timeout(http.timeout())
            .user_agent(http.user_agent.clone())
            .danger_accept_invalid_certs(http.accept_invalid_certs)
            .build()
            .map_err(|e| CountError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(ServiceClient {
            client,
            endpoints,
            metrics,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// GET `endpoint` with `query` and return the body of a successful response
    async fn get_body(&self, provider: Provider, endpoint: &str, query: &[(&str, &str)]) -> Option<String> {
        debug!("Querying provider={} endpoint={}", provider, endpoint);

        let response = match self.client.get(endpoint).query(query).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Request to provider={} failed: {}", provider, e);
                self.metrics.record_provider(provider, false);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!("Provider={} returned status={}", provider, status);
            self.metrics.record_provider(provider, false);
            return None;
        }

        match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!("Failed to read body from provider={}: {}", provider, e);
                self.metrics.record_provider(provider, false);
                None
            }
        }
    }

    /// Run `parse` over the body and record the outcome
    fn finish(&self, provider: Provider, url: &str, parsed: Option<PartialCount>) -> Option<PartialCount> {
        match parsed {
            Some(partial) => {
                debug!("Provider={} reported {:?} for url={}", provider, partial, url);
                self.metrics.record_provider(provider, true);
                Some(partial)
            }
            None => {
                warn!("Provider={} returned an unusable body for url={}", provider, url);
                self.metrics.record_provider(provider, false);
                None
            }
        }
    }

    /// Aggregator mode: several services in one call
    pub async fn fetch_sharedcount(&self, url: &str, api_key: &str) -> Option<PartialCount> {
        let query = [("url", url), ("apikey", api_key.trim())];
        let body = self
            .get_body(Provider::SharedCount, &self.endpoints.sharedcount, &query)
            .await?;
        self.finish(Provider::SharedCount, url, parse_sharedcount(&body))
    }

    /// Native Facebook Graph API lookup
    pub async fn fetch_facebook(&self, url: &str, access_token: Option<&str>) -> Option<PartialCount> {
        let mut query = vec![("id", url)];
        if let Some(token) = access_token.filter(|t| !t.is_empty()) {
            query.push(("access_token", token));
        }
        let body = self
            .get_body(Provider::Facebook, &self.endpoints.facebook, &query)
            .await?;
        self.finish(Provider::Facebook, url, parse_facebook(&body))
    }

    /// Native Pinterest lookup; the API answers with JSONP
    pub async fn fetch_pinterest(&self, url: &str) -> Option<PartialCount> {
        let query = [("callback", "receiveCount"), ("url", url)];
        let body = self
            .get_body(Provider::Pinterest, &self.endpoints.pinterest, &query)
            .await?;
        self.finish(Provider::Pinterest, url, parse_pinterest(&body))
    }

    /// Third-party Twitter count lookup
    pub async fn fetch_twitter(&self, url: &str) -> Option<PartialCount> {
        let query = [("url", url)];
        let body = self
            .get_body(Provider::Twitter, &self.endpoints.twitter, &query)
            .await?;
        let parsed = parse_count_field(&body).map(|n| PartialCount::new().with(&[TWITTER], n));
        self.finish(Provider::Twitter, url, parsed)
    }

    /// Yummly lookup
    pub async fn fetch_yummly(&self, url: &str) -> Option<PartialCount> {
        let query = [("url", url)];
        let body = self
            .get_body(Provider::Yummly, &self.endpoints.yummly, &query)
            .await?;
        let parsed = parse_count_field(&body).map(|n| PartialCount::new().with(&[YUMMLY], n));
        self.finish(Provider::Yummly, url, parsed)
    }
}

/// Parse an aggregator response.
///
/// Each field is optional; only the ones present are reported.
pub fn parse_sharedcount(body: &str) -> Option<PartialCount> {
    let json: Value = serde_json::from_str(body).ok()?;
    if !json.is_object() {
        return None;
    }

    let mut partial = PartialCount::new();
    if let Some(facebook) = json.get(FACEBOOK).filter(|v| v.is_object()) {
        for field in [LIKE_COUNT, COMMENT_COUNT, SHARE_COUNT, TOTAL_COUNT] {
            if let Some(value) = facebook.get(field) {
                partial.set(&[FACEBOOK, field], absint(value));
            }
        }
    }
    for service in [PINTEREST, LINKEDIN] {
        if let Some(value) = json.get(service) {
            partial.set(&[service], absint(value));
        }
    }
    Some(partial)
}

/// Parse a Graph API response.
///
/// The API has answered with two layouts over time: top-level `shares` and
/// `comments`, or both nested under `share`. The flat layout is tried first.
/// A field missing from both layouts is not reported. Likes and the total are
/// derived when the result is applied.
pub fn parse_facebook(body: &str) -> Option<PartialCount> {
    let json: Value = serde_json::from_str(body).ok()?;
    if !json.is_object() {
        return None;
    }

    let nested = |field: &str| json.get("share").and_then(|share| share.get(field));
    let mut partial = PartialCount::new().with_facebook_totals();
    if let Some(share) = json.get("shares").or_else(|| nested(SHARE_COUNT)) {
        partial.set(&[FACEBOOK, SHARE_COUNT], absint(share));
    }
    if let Some(comment) = json.get("comments").or_else(|| nested(COMMENT_COUNT)) {
        partial.set(&[FACEBOOK, COMMENT_COUNT], absint(comment));
    }
    Some(partial)
}

/// Parse a Pinterest response, stripping the `receiveCount(...)` wrapper
pub fn parse_pinterest(body: &str) -> Option<PartialCount> {
    let body = body.trim();
    let json = body
        .strip_prefix("receiveCount(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(body);
    parse_count_field(json).map(|n| PartialCount::new().with(&[PINTEREST], n))
}

/// Read the `count` field of a `{ "count": n }` response
pub fn parse_count_field(body: &str) -> Option<u64> {
    let json: Value = serde_json::from_str(body).ok()?;
    json.get("count").map(absint)
}
