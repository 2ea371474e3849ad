//! End-to-end reads, deferred refreshes and group management

use shared_counts::config::{CountSource, CountsConfig, Endpoints, Provider};
use shared_counts::models::{now_epoch, Counts, ItemKey, FACEBOOK, TOTAL_COUNT, TWITTER};
use shared_counts::{
    ContentCatalog, ContentInfo, CountDisplay, CountHooks, CountMetrics, CountStore, CountType,
    ReadState, ShareCounts,
};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const POST_URL: &str = "https://example.com/post/";
const OLD_URL: &str = "https://old.example.com/post/";

fn config(server: &MockServer) -> CountsConfig {
    CountsConfig {
        count_source: CountSource::Native,
        query_services: vec![Provider::Facebook],
        endpoints: Endpoints::with_base(&server.uri()),
        site_url: "https://example.com/".to_string(),
        ..CountsConfig::default()
    }
}

fn catalog() -> Arc<ContentCatalog> {
    Arc::new(ContentCatalog::new(vec![ContentInfo::new(
        1,
        POST_URL,
        now_epoch() - 3600,
    )]))
}

fn engine(server: &MockServer) -> ShareCounts {
    ShareCounts::new(Arc::new(config(server)), CountStore::memory(), catalog()).unwrap()
}

async fn mount_facebook(server: &MockServer, url: &str, shares: u64, expect: u64) {
    Mock::given(method("GET"))
        .and(path("/facebook/"))
        .and(query_param("id", url))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!(r#"{{"shares":{}}}"#, shares)),
        )
        .expect(expect)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_reads_defer_a_single_refresh() {
    let server = MockServer::start().await;
    mount_facebook(&server, POST_URL, 1500, 1).await;

    let engine = engine(&server);
    let key = ItemKey::Content(1);
    let mut ctx = engine.new_ctx();

    // nothing stored yet: reads answer immediately with empty counts
    assert!(engine.counts(&mut ctx, &key, false).await.is_empty());
    assert!(engine.counts(&mut ctx, &key, false).await.is_empty());
    assert_eq!(ctx.pending(), 1);

    let report = engine.finish(ctx).await;
    assert_eq!(report.refreshed, 1);
    assert_eq!(engine.metrics().enqueued_total.get(), 1);

    let mut ctx = engine.new_ctx();
    let shown = engine
        .count(&mut ctx, &key, &CountType::Facebook, Some(2))
        .await;
    assert_eq!(shown, CountDisplay::Abbreviated("1.5k".to_string()));
    assert_eq!(ctx.pending(), 0);
    assert_eq!(engine.metrics().reads(ReadState::Fresh), 1);
}

#[tokio::test]
async fn test_forced_read_refreshes_first() {
    let server = MockServer::start().await;
    mount_facebook(&server, POST_URL, 8, 1).await;

    let engine = engine(&server);
    let mut ctx = engine.new_ctx();
    let counts = engine.counts(&mut ctx, &ItemKey::Content(1), true).await;

    assert_eq!(counts.value(&[FACEBOOK, TOTAL_COUNT]), Some(8));
    assert_eq!(ctx.pending(), 0);
}

#[tokio::test]
async fn test_forced_read_with_huge_provider_counts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/facebook/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"shares":18446744073709551615,"comments":7}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server);
    let mut ctx = engine.new_ctx();
    let counts = engine.counts(&mut ctx, &ItemKey::Content(1), true).await;

    assert_eq!(counts.value(&[FACEBOOK, TOTAL_COUNT]), Some(u64::MAX));
    assert_eq!(engine.total(&counts), u64::MAX);
    assert_eq!(engine.document(1).await.unwrap().unwrap().total, u64::MAX);
}

#[tokio::test]
async fn test_spawn_finish_runs_in_background() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/facebook/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"shares":2}"#))
        .expect(2)
        .mount(&server)
        .await;

    let engine = Arc::new(engine(&server));
    let mut ctx = engine.new_ctx();
    engine.counts(&mut ctx, &ItemKey::Site, false).await;
    engine
        .counts(&mut ctx, &ItemKey::Url(OLD_URL.to_string()), false)
        .await;

    let report = engine.spawn_finish(ctx).await.unwrap();
    assert_eq!(report.refreshed, 2);

    let mut ctx = engine.new_ctx();
    let total = engine
        .count(&mut ctx, &ItemKey::Site, &CountType::Total, None)
        .await;
    assert_eq!(total, CountDisplay::Exact(2));
}

#[tokio::test]
async fn test_deleting_group_removes_its_counts() {
    let server = MockServer::start().await;
    mount_facebook(&server, POST_URL, 10, 1).await;
    mount_facebook(&server, OLD_URL, 4, 1).await;

    let engine = engine(&server);
    let slug = engine.add_group(1, "", OLD_URL).await.unwrap();
    let doc = engine.document(1).await.unwrap().unwrap();
    assert_eq!(doc.groups[&slug].name, OLD_URL);

    engine.update_item(&ItemKey::Content(1)).await.unwrap();
    assert_eq!(engine.document(1).await.unwrap().unwrap().total, 14);

    engine.delete_group(1, &slug).await.unwrap();
    let doc = engine.document(1).await.unwrap().unwrap();
    assert!(doc.groups.is_empty());
    assert_eq!(doc.total, 10);
    assert_eq!(doc.counts.value(&[FACEBOOK, TOTAL_COUNT]), Some(10));
}

#[tokio::test]
async fn test_update_url_item() {
    let server = MockServer::start().await;
    mount_facebook(&server, OLD_URL, 6, 1).await;

    let engine = engine(&server);
    let counts = engine
        .update_item(&ItemKey::Url(OLD_URL.to_string()))
        .await
        .unwrap();
    assert_eq!(counts.value(&[FACEBOOK, TOTAL_COUNT]), Some(6));
}

struct SiteHooks;

impl CountHooks for SiteHooks {
    fn after_query(&self, mut counts: Counts, _key: &ItemKey, _url: &str) -> Counts {
        counts.set(&["Email"], 3);
        counts
    }

    fn adjust_total(&self, total: u64, _counts: &Counts) -> u64 {
        total + 100
    }

    fn custom_count(&self, kind: &str, counts: &Counts, _key: &ItemKey) -> u64 {
        match kind {
            "email" => counts.value(&["Email"]).unwrap_or(0),
            _ => 0,
        }
    }

    fn preserve_http(&self, _key: &ItemKey) -> bool {
        false
    }
}

#[tokio::test]
async fn test_custom_hooks() {
    let server = MockServer::start().await;
    mount_facebook(&server, POST_URL, 10, 1).await;
    mount_facebook(&server, "http://example.com/post/", 3, 0).await;

    let mut config = config(&server);
    config.preserve_http = true;
    let engine = ShareCounts::with_hooks(
        Arc::new(config),
        CountStore::memory(),
        catalog(),
        Arc::new(SiteHooks),
        CountMetrics::new().unwrap(),
    )
    .unwrap();

    engine.update_item(&ItemKey::Content(1)).await.unwrap();
    let doc = engine.document(1).await.unwrap().unwrap();
    assert!(doc.groups.is_empty());
    assert_eq!(doc.total, 113);

    let mut ctx = engine.new_ctx();
    let key = ItemKey::Content(1);
    let email = engine
        .count(&mut ctx, &key, &CountType::from("email"), None)
        .await;
    assert_eq!(email, CountDisplay::Exact(3));
    let twitter = engine.count(&mut ctx, &key, &CountType::Twitter, None).await;
    assert_eq!(twitter.as_exact(), Some(0));

    let counts = engine.counts(&mut ctx, &key, false).await;
    assert_eq!(counts.value(&[TWITTER]), Some(0));
    assert_eq!(engine.total(&counts), 113);
}
