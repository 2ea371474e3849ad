//! Configuration management for the share count engine

use crate::error::{CountError, Result};
use crate::staleness::{StalenessPolicy, StalenessTier};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Where share counts come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountSource {
    /// Counting disabled; reads return whatever is stored (usually nothing)
    #[default]
    None,
    /// One aggregator API call returns several services at once
    #[serde(alias = "aggregator")]
    SharedCount,
    /// Each network's own API is queried individually
    Native,
}

/// An external counting API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    SharedCount,
    Facebook,
    Twitter,
    Pinterest,
    Yummly,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::SharedCount => "sharedcount",
            Provider::Facebook => "facebook",
            Provider::Twitter => "twitter",
            Provider::Pinterest => "pinterest",
            Provider::Yummly => "yummly",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountsConfig {
    /// Count source (default: none)
    #[serde(default)]
    pub count_source: CountSource,

    /// API key for the aggregator service, required in sharedcount mode
    #[serde(default)]
    pub sharedcount_key: String,

    /// Optional Graph API access token for native Facebook queries
    #[serde(default)]
    pub fb_access_token: String,

    /// Also fetch Twitter counts in sharedcount mode (default: false)
    #[serde(default)]
    pub twitter_counts: bool,

    /// Also fetch Yummly counts in sharedcount mode (default: false)
    #[serde(default)]
    pub yummly_counts: bool,

    /// Services queried in native mode, in order
    #[serde(default)]
    pub query_services: Vec<Provider>,

    /// Keep tracking the http:// spelling of https content (default: false)
    #[serde(default)]
    pub preserve_http: bool,

    /// Content types that carry share counts (default: ["post"])
    #[serde(default = "default_post_types")]
    pub post_types: Vec<String>,

    /// Count types summed by the `included_total` count type
    #[serde(default = "default_included_services")]
    pub included_services: Vec<String>,

    /// Home URL of the site, used for the `site` item
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Staleness schedule, first matching tier wins
    #[serde(default = "default_staleness")]
    pub staleness: Vec<StalenessTier>,

    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Provider endpoints
    #[serde(default)]
    pub endpoints: Endpoints,

    /// Directory of the file-backed count store
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// YAML catalog of content items used by the command line tool
    #[serde(default)]
    pub catalog_path: Option<String>,
}

/// Settings applied to every provider request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Per-request timeout in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User agent sent to providers
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Skip TLS certificate validation for provider hosts (default: true)
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            accept_invalid_certs: default_true(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Base URLs of the counting APIs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoints {
    #[serde(default = "default_sharedcount_endpoint")]
    pub sharedcount: String,
    #[serde(default = "default_facebook_endpoint")]
    pub facebook: String,
    #[serde(default = "default_twitter_endpoint")]
    pub twitter: String,
    #[serde(default = "default_pinterest_endpoint")]
    pub pinterest: String,
    #[serde(default = "default_yummly_endpoint")]
    pub yummly: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sharedcount: default_sharedcount_endpoint(),
            facebook: default_facebook_endpoint(),
            twitter: default_twitter_endpoint(),
            pinterest: default_pinterest_endpoint(),
            yummly: default_yummly_endpoint(),
        }
    }
}

impl Endpoints {
    /// Point every provider at one base URL, e.g. a local mock server.
    ///
    /// Each provider gets its own path below the base.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            sharedcount: format!("{}/sharedcount/", base),
            facebook: format!("{}/facebook/", base),
            twitter: format!("{}/twitter/counts.php", base),
            pinterest: format!("{}/pinterest/count.json", base),
            yummly: format!("{}/yummly/yum-count", base),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_post_types() -> Vec<String> {
    vec!["post".to_string()]
}

fn default_included_services() -> Vec<String> {
    vec![
        "facebook".to_string(),
        "twitter".to_string(),
        "pinterest".to_string(),
    ]
}

fn default_site_url() -> String {
    "http://localhost/".to_string()
}

fn default_staleness() -> Vec<StalenessTier> {
    StalenessPolicy::default_tiers()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    "Shared Counts Plugin".to_string()
}

fn default_store_dir() -> String {
    "/var/lib/shared-counts".to_string()
}

fn default_sharedcount_endpoint() -> String {
    "https://api.sharedcount.com/v1.0/".to_string()
}

fn default_facebook_endpoint() -> String {
    "https://graph.facebook.com/".to_string()
}

fn default_twitter_endpoint() -> String {
    "https://counts.twitcount.com/counts.php".to_string()
}

fn default_pinterest_endpoint() -> String {
    "https://api.pinterest.com/v1/urls/count.json".to_string()
}

fn default_yummly_endpoint() -> String {
    "https://www.yummly.com/services/yum-count".to_string()
}

impl Default for CountsConfig {
    fn default() -> Self {
        CountsConfig {
            count_source: CountSource::None,
            sharedcount_key: String::new(),
            fb_access_token: String::new(),
            twitter_counts: false,
            yummly_counts: false,
            query_services: Vec::new(),
            preserve_http: false,
            post_types: default_post_types(),
            included_services: default_included_services(),
            site_url: default_site_url(),
            staleness: default_staleness(),
            http: HttpConfig::default(),
            endpoints: Endpoints::default(),
            store_dir: default_store_dir(),
            catalog_path: None,
        }
    }
}

impl CountsConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(CountsConfig)` if loading and validation succeed
    /// * `Err(CountError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            CountError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: CountsConfig = serde_yaml::from_str(content).map_err(|e| {
            CountError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - sharedcount mode requires a non-empty `sharedcount_key`
    /// - `query_services` may only name native providers
    /// - the staleness schedule must be non-empty and end with a zero-age tier
    /// - `http.timeout_secs` must be > 0
    /// - `site_url` must be an absolute URL
    pub fn validate(&self) -> Result<()> {
        if self.count_source == CountSource::SharedCount && self.sharedcount_key.trim().is_empty() {
            return Err(CountError::ConfigError(
                "sharedcount_key is required when count_source is 'sharedcount'".to_string(),
            ));
        }

        if self.query_services.contains(&Provider::SharedCount) {
            return Err(CountError::ConfigError(
                "query_services may only list native services".to_string(),
            ));
        }

        StalenessPolicy::new(self.staleness.clone())?;

        if self.http.timeout_secs == 0 {
            return Err(CountError::ConfigError(
                "http.timeout_secs must be greater than 0".to_string(),
            ));
        }

        url::Url::parse(&self.site_url).map_err(|e| {
            CountError::ConfigError(format!("site_url '{}' is invalid: {}", self.site_url, e))
        })?;

        Ok(())
    }

    /// Whether any provider will be queried at all
    pub fn counts_enabled(&self) -> bool {
        self.count_source != CountSource::None
    }

    /// Whether content of the given type carries share counts
    pub fn supports_type(&self, content_type: &str) -> bool {
        self.post_types.iter().any(|t| t == content_type)
    }
}
