use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::advance;
use tokio_util::sync::CancellationToken;

use apilens_core::capture::{
    CaptureDriver, CaptureFeed, CaptureResult, NetworkEvent, RequestEvent, ResourceKind,
};
use apilens_core::{ApiLens, ApiLensConfig, CleanupRequest};

struct OneRequestDriver;

#[async_trait]
impl CaptureDriver for OneRequestDriver {
    async fn capture(
        &self,
        url: &str,
        feed: CaptureFeed,
        _cancel: CancellationToken,
    ) -> CaptureResult<()> {
        feed.push(NetworkEvent::Request(RequestEvent {
            url: format!("{url}/api/status"),
            method: "GET".to_string(),
            headers: HashMap::new(),
            resource_kind: ResourceKind::Xhr,
            body: None,
        }));
        Ok(())
    }
}

fn quiet_sweeper_config() -> ApiLensConfig {
    // Sweeps far apart so each test controls removal explicitly.
    let mut config = ApiLensConfig::default();
    config.session.cleanup_interval_ms = 7_200_000;
    config
}

#[tokio::test(start_paused = true)]
async fn sessions_expire_after_the_ttl() {
    let config = quiet_sweeper_config();
    let ttl_ms = config.session.ttl_ms;
    let lens = ApiLens::new(&config, Arc::new(OneRequestDriver));

    let report = lens.capture("https://shop.example").await.expect("capture");
    assert!(lens.session(&report.session_id).is_some());

    advance(Duration::from_millis(ttl_ms + 1)).await;
    assert!(lens.session(&report.session_id).is_none());

    let stats = lens.cleanup(CleanupRequest::standard());
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.remaining, 0);
    lens.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn store_evicts_least_recently_accessed_beyond_the_cap() {
    let mut config = quiet_sweeper_config();
    config.session.max_sessions = 2;
    let lens = ApiLens::new(&config, Arc::new(OneRequestDriver));

    let first = lens.capture("https://a.example").await.expect("capture");
    advance(Duration::from_millis(1)).await;
    let second = lens.capture("https://b.example").await.expect("capture");
    advance(Duration::from_millis(1)).await;
    let third = lens.capture("https://c.example").await.expect("capture");

    assert_eq!(lens.session_count(), 2);
    assert!(lens.session(&first.session_id).is_none(), "oldest evicted");
    assert!(lens.session(&second.session_id).is_some());
    assert!(lens.session(&third.session_id).is_some());
    lens.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn forced_cleanup_empties_the_store() {
    let lens = ApiLens::new(&quiet_sweeper_config(), Arc::new(OneRequestDriver));
    lens.capture("https://a.example").await.expect("capture");
    lens.capture("https://b.example").await.expect("capture");

    let stats = lens.cleanup(CleanupRequest::force());
    assert_eq!(stats.removed, 2);
    assert_eq!(stats.remaining, 0);
    assert_eq!(lens.session_count(), 0);
    lens.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn max_age_cleanup_removes_only_older_sessions() {
    let lens = ApiLens::new(&quiet_sweeper_config(), Arc::new(OneRequestDriver));

    let old = lens.capture("https://a.example").await.expect("capture");
    advance(Duration::from_secs(600)).await;
    let fresh = lens.capture("https://b.example").await.expect("capture");

    let stats = lens.cleanup(CleanupRequest::max_age_minutes(5));
    assert_eq!(stats.removed, 1);
    assert!(lens.session(&old.session_id).is_none());
    assert!(lens.session(&fresh.session_id).is_some());
    lens.shutdown().await;
}
