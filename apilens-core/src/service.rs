use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::capture::{
    capture_channel, run_capture, CaptureDriver, CaptureError, CaptureOptions, CaptureOutcome,
    CaptureResult, ChromeDriver, EVENT_CHANNEL_CAPACITY,
};
use crate::config::ApiLensConfig;
use crate::session::{
    spawn_cleanup_task, CleanupRequest, CleanupStats, Session, SessionStore, SessionView,
};

/// What one finished capture produced, keyed by the session it was stored
/// under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReport {
    pub session_id: String,
    pub url: String,
    pub outcome: CaptureOutcome,
}

/// Facade over the capture pipeline and the session store. Owns the store
/// sweeper and one cancellation token per in-flight capture; `shutdown`
/// cancels them all.
///
/// Must be constructed inside a Tokio runtime.
pub struct ApiLens {
    store: Arc<SessionStore>,
    driver: Arc<dyn CaptureDriver>,
    window: Duration,
    active: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ApiLens {
    pub fn new(config: &ApiLensConfig, driver: Arc<dyn CaptureDriver>) -> Self {
        let store = Arc::new(SessionStore::new(config.session.settings()));
        let shutdown = CancellationToken::new();
        let sweeper = spawn_cleanup_task(
            Arc::clone(&store),
            config.session.cleanup_interval(),
            shutdown.clone(),
        );
        Self {
            store,
            driver,
            window: config.browser.capture_window(),
            active: Mutex::new(HashMap::new()),
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn with_chrome(config: &ApiLensConfig) -> Self {
        let driver = ChromeDriver::new(config.browser.driver_settings(), config.retry.policy());
        Self::new(config, Arc::new(driver))
    }

    /// Runs one capture end to end and stores the result. A cancelled
    /// capture is not stored; a capture truncated by the window keeps its
    /// partial records.
    pub async fn capture(&self, url: &str) -> CaptureResult<CaptureReport> {
        let session_id = Uuid::new_v4().to_string();
        let cancel = self.shutdown.child_token();
        self.register(&session_id, cancel.clone());

        let result = self.run_one(url, cancel).await;
        self.deregister(&session_id);

        let outcome = result?;
        if outcome.cancelled {
            return Err(CaptureError::Cancelled);
        }

        let evicted = self
            .store
            .put(Session::with_id(&session_id, url, outcome.records.clone()));
        info!(
            session = %session_id,
            records = outcome.records.len(),
            pending = outcome.pending,
            evicted,
            "capture stored"
        );
        Ok(CaptureReport {
            session_id,
            url: url.to_string(),
            outcome,
        })
    }

    async fn run_one(&self, url: &str, cancel: CancellationToken) -> CaptureResult<CaptureOutcome> {
        let (feed, events) = capture_channel(EVENT_CHANNEL_CAPACITY);
        let driver = Arc::clone(&self.driver);
        let driver_url = url.to_string();
        let driver_cancel = cancel.clone();
        let driver_task =
            tokio::spawn(async move { driver.capture(&driver_url, feed, driver_cancel).await });

        let options = CaptureOptions::new(self.window).with_cancel(cancel.clone());
        let outcome = run_capture(events, options).await;

        // The window has closed one way or another; stop whatever the
        // driver is still doing.
        cancel.cancel();
        match driver_task.await {
            Ok(Ok(())) => {}
            Ok(Err(CaptureError::Cancelled)) => {}
            Ok(Err(err)) => return Err(err),
            Err(err) => return Err(CaptureError::from(err)),
        }
        Ok(outcome)
    }

    pub fn session(&self, id: &str) -> Option<SessionView> {
        self.store.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Cancels an in-flight capture or removes a stored session, whichever
    /// the id names.
    pub fn cancel(&self, id: &str) -> CaptureResult<()> {
        if let Some(token) = self.active.lock().expect("active captures poisoned").get(id) {
            token.cancel();
            info!(session = %id, "capture cancellation requested");
            return Ok(());
        }
        if self.store.remove(id) {
            info!(session = %id, "stored session removed");
            return Ok(());
        }
        Err(CaptureError::SessionNotFound(id.to_string()))
    }

    pub fn cleanup(&self, request: CleanupRequest) -> CleanupStats {
        self.store.cleanup(request)
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .sweeper
            .lock()
            .expect("sweeper handle poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "sweeper join error");
            }
        }
    }

    fn register(&self, id: &str, cancel: CancellationToken) {
        self.active
            .lock()
            .expect("active captures poisoned")
            .insert(id.to_string(), cancel);
    }

    fn deregister(&self, id: &str) {
        self.active
            .lock()
            .expect("active captures poisoned")
            .remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureFeed, NetworkEvent, RequestEvent, ResourceKind, ResponseEvent};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;

    struct ScriptedDriver {
        events: Vec<NetworkEvent>,
    }

    #[async_trait]
    impl CaptureDriver for ScriptedDriver {
        async fn capture(
            &self,
            _url: &str,
            feed: CaptureFeed,
            _cancel: CancellationToken,
        ) -> CaptureResult<()> {
            for event in &self.events {
                feed.push(event.clone());
            }
            Ok(())
        }
    }

    struct HangingDriver;

    #[async_trait]
    impl CaptureDriver for HangingDriver {
        async fn capture(
            &self,
            _url: &str,
            feed: CaptureFeed,
            cancel: CancellationToken,
        ) -> CaptureResult<()> {
            feed.push(request("https://shop.example/api/cart"));
            cancel.cancelled().await;
            Ok(())
        }
    }

    struct FailingDriver;

    #[async_trait]
    impl CaptureDriver for FailingDriver {
        async fn capture(
            &self,
            _url: &str,
            _feed: CaptureFeed,
            _cancel: CancellationToken,
        ) -> CaptureResult<()> {
            Err(CaptureError::Launch("no usable chromium".to_string()))
        }
    }

    fn request(url: &str) -> NetworkEvent {
        NetworkEvent::Request(RequestEvent {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: StdHashMap::new(),
            resource_kind: ResourceKind::Xhr,
            body: None,
        })
    }

    fn response(url: &str) -> NetworkEvent {
        NetworkEvent::Response(ResponseEvent {
            url: url.to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: StdHashMap::new(),
            body_text: Some("{\"ok\":true}".to_string()),
        })
    }

    #[tokio::test]
    async fn capture_stores_a_queryable_session() {
        let config = ApiLensConfig::default();
        let driver = ScriptedDriver {
            events: vec![
                request("https://shop.example/api/cart"),
                response("https://shop.example/api/cart"),
            ],
        };
        let lens = ApiLens::new(&config, Arc::new(driver));

        let report = lens.capture("https://shop.example").await.expect("capture");
        assert_eq!(report.outcome.records.len(), 1);
        assert!(!report.outcome.deadline_hit);

        let view = lens.session(&report.session_id).expect("session");
        assert_eq!(view.url, "https://shop.example");
        assert_eq!(view.records.len(), 1);
        assert!(view.records[0].response.is_some());

        lens.shutdown().await;
    }

    #[tokio::test]
    async fn driver_failures_surface_and_store_nothing() {
        let config = ApiLensConfig::default();
        let lens = ApiLens::new(&config, Arc::new(FailingDriver));

        let err = lens.capture("https://shop.example").await.unwrap_err();
        assert!(matches!(err, CaptureError::Launch(_)));
        assert_eq!(lens.session_count(), 0);

        lens.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_an_in_flight_capture_discards_it() {
        let config = ApiLensConfig::default();
        let lens = Arc::new(ApiLens::new(&config, Arc::new(HangingDriver)));

        let task = tokio::spawn({
            let lens = Arc::clone(&lens);
            async move { lens.capture("https://shop.example").await }
        });
        tokio::task::yield_now().await;

        let in_flight = lens
            .active
            .lock()
            .expect("active captures poisoned")
            .keys()
            .next()
            .cloned()
            .expect("one capture in flight");
        lens.cancel(&in_flight).expect("cancel accepted");

        let result = task.await.expect("join");
        assert!(matches!(result, Err(CaptureError::Cancelled)));
        assert_eq!(lens.session_count(), 0);

        lens.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_removes_stored_sessions_and_rejects_unknown_ids() {
        let config = ApiLensConfig::default();
        let driver = ScriptedDriver {
            events: vec![request("https://shop.example/api/cart")],
        };
        let lens = ApiLens::new(&config, Arc::new(driver));

        let report = lens.capture("https://shop.example").await.expect("capture");
        lens.cancel(&report.session_id).expect("stored session removed");
        assert!(lens.session(&report.session_id).is_none());

        let err = lens.cancel("not-a-session").unwrap_err();
        assert!(matches!(err, CaptureError::SessionNotFound(_)));

        lens.shutdown().await;
    }
}
