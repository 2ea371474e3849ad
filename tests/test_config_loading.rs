use shared_counts::config::{CountSource, CountsConfig, Provider};
use shared_counts::CountError;
use std::io::Write;

#[test]
fn test_load_sample_config() {
    let config = CountsConfig::from_file("config/shared_counts.yaml");
    assert!(config.is_ok(), "Failed to load sample config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.count_source, CountSource::Native);
    assert_eq!(
        config.query_services,
        vec![Provider::Facebook, Provider::Pinterest, Provider::Twitter]
    );
    assert!(config.preserve_http);
    assert!(config.supports_type("recipe"));
    assert_eq!(config.staleness.len(), 3);
    assert_eq!(config.catalog_path.as_deref(), Some("config/content.yaml"));
}

#[test]
fn test_load_minimal_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "count_source: sharedcount").unwrap();
    writeln!(file, "sharedcount_key: \" abc123 \"").unwrap();

    let config = CountsConfig::from_file(file.path()).unwrap();
    assert_eq!(config.count_source, CountSource::SharedCount);
    // defaults are applied
    assert_eq!(config.post_types, vec!["post".to_string()]);
    assert_eq!(config.http.timeout_secs, 5);
    assert!(!config.twitter_counts);
    assert!(config.query_services.is_empty());
}

#[test]
fn test_load_invalid_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "count_source: native").unwrap();
    writeln!(file, "staleness: []").unwrap();

    let result = CountsConfig::from_file(file.path());
    assert!(matches!(result, Err(CountError::ConfigError(_))));
}

#[test]
fn test_load_unknown_provider() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "count_source: native").unwrap();
    writeln!(file, "query_services: [myspace]").unwrap();

    let result = CountsConfig::from_file(file.path());
    assert!(matches!(result, Err(CountError::ConfigError(msg)) if msg.contains("parse")));
}

#[test]
fn test_load_missing_file() {
    let result = CountsConfig::from_file("/nonexistent/shared_counts.yaml");
    assert!(matches!(result, Err(CountError::ConfigError(msg)) if msg.contains("read")));
}

#[test]
fn test_load_sample_catalog() {
    let catalog = shared_counts::ContentCatalog::from_file("config/content.yaml").unwrap();
    assert_eq!(catalog.len(), 3);
}
