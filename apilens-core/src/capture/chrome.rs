use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, Headers, RequestId, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::error::{CaptureError, CaptureResult};
use super::event::{NetworkEvent, RequestEvent, ResourceKind, ResponseEvent};
use super::pipeline::CaptureFeed;
use super::retry::{RetryOptions, RetryPolicy};

/// Source of network events for one capture. The production implementation
/// drives a Chromium instance; tests script events in memory.
#[async_trait]
pub trait CaptureDriver: Send + Sync {
    /// Navigates to `url` and pushes observed traffic into `feed` until the
    /// page has settled or `cancel` fires. Dropping the feed ends the
    /// consumer side, so implementations hold it for the whole visit.
    async fn capture(
        &self,
        url: &str,
        feed: CaptureFeed,
        cancel: CancellationToken,
    ) -> CaptureResult<()>;
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub navigation_timeout: Duration,
    pub wait_after_load: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            navigation_timeout: Duration::from_secs(30),
            wait_after_load: Duration::from_millis(2_000),
        }
    }
}

/// Chromium-backed driver. Each capture launches its own browser so
/// concurrent captures never share page state.
#[derive(Debug, Clone)]
pub struct ChromeDriver {
    settings: DriverSettings,
    retry: RetryPolicy,
}

impl ChromeDriver {
    pub fn new(settings: DriverSettings, retry: RetryPolicy) -> Self {
        Self { settings, retry }
    }

    fn chromium_config(&self) -> CaptureResult<ChromiumConfig> {
        let mut builder =
            ChromiumConfig::builder().request_timeout(self.settings.navigation_timeout);
        if let Some(path) = &self.settings.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !self.settings.headless {
            builder = builder.with_head();
        }
        // Background throttling would silence exactly the polling traffic we
        // are here to observe.
        builder = builder.args(vec!["--disable-background-timer-throttling"]);
        builder.build().map_err(CaptureError::Configuration)
    }

    async fn run_page(
        &self,
        browser: &Browser,
        url: &str,
        feed: CaptureFeed,
        cancel: &CancellationToken,
    ) -> CaptureResult<()> {
        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        page.execute(EnableParams::default()).await?;

        let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
        let mut responses = page.event_listener::<EventResponseReceived>().await?;
        let mut failures = page.event_listener::<EventLoadingFailed>().await?;

        let stop = cancel.child_token();
        let forwarder = {
            let page = page.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        event = requests.next() => match event {
                            Some(event) => forward_request(&feed, &event),
                            None => break,
                        },
                        event = responses.next() => match event {
                            Some(event) => forward_response(&feed, &page, &event).await,
                            None => break,
                        },
                        event = failures.next() => match event {
                            Some(event) => trace!(
                                request = ?event.request_id,
                                error = %event.error_text,
                                "resource failed to load"
                            ),
                            None => break,
                        },
                    }
                }
            })
        };

        let navigation = self.navigate_with_retry(&page, url, cancel).await;
        if navigation.is_ok() {
            // Settle window for traffic fired after the load event.
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.settings.wait_after_load) => {}
            }
        }

        stop.cancel();
        if let Err(err) = forwarder.await {
            warn!(error = %err, "event forwarder join error");
        }
        navigation
    }

    async fn navigate_with_retry(
        &self,
        page: &Page,
        url: &str,
        cancel: &CancellationToken,
    ) -> CaptureResult<()> {
        let target = url.to_string();
        let options = RetryOptions::new().with_cancel(cancel.clone()).with_on_retry(
            |retry, max_retries, delay, error: &CaptureError| {
                warn!(
                    retry,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "navigation failed, retrying"
                );
            },
        );
        let outcome = self
            .retry
            .run(options, |_attempt| {
                let page = page.clone();
                let url = target.clone();
                async move { navigate(&page, &url).await }
            })
            .await?;
        debug!(url = %target, attempts = outcome.attempts, "navigation complete");
        Ok(())
    }
}

#[async_trait]
impl CaptureDriver for ChromeDriver {
    async fn capture(
        &self,
        url: &str,
        feed: CaptureFeed,
        cancel: CancellationToken,
    ) -> CaptureResult<()> {
        let config = self.chromium_config()?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| CaptureError::Launch(err.to_string()))?;
        info!(url = %url, headless = self.settings.headless, "chromium launched");

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let result = self.run_page(&browser, url, feed, &cancel).await;

        if let Err(err) = browser.close().await {
            warn!(error = %err, "failed to close browser cleanly");
        }
        if let Err(err) = handler_task.await {
            warn!(error = %err, "browser handler join error");
        }
        result
    }
}

async fn navigate(page: &Page, url: &str) -> CaptureResult<()> {
    let params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(CaptureError::Configuration)?;
    page.goto(params).await?;
    page.wait_for_navigation().await?;
    Ok(())
}

fn forward_request(feed: &CaptureFeed, event: &EventRequestWillBeSent) {
    let request = &event.request;
    let resource_kind = event
        .r#type
        .as_ref()
        .map(resource_kind_from_cdp)
        .unwrap_or_else(|| ResourceKind::Other("other".to_string()));
    feed.push(NetworkEvent::Request(RequestEvent {
        url: request.url.clone(),
        method: request.method.clone(),
        headers: header_map(&request.headers),
        resource_kind,
        body: request.post_data.clone(),
    }));
}

async fn forward_response(feed: &CaptureFeed, page: &Page, event: &EventResponseReceived) {
    let body_text = fetch_body(page, &event.request_id).await;
    let response = &event.response;
    feed.push(NetworkEvent::Response(ResponseEvent {
        url: response.url.clone(),
        status: response.status as u16,
        status_text: response.status_text.clone(),
        headers: header_map(&response.headers),
        body_text,
    }));
}

/// Body reads race the browser's own buffer lifetime, so a miss is normal
/// and leaves the record without a body.
async fn fetch_body(page: &Page, request_id: &RequestId) -> Option<String> {
    let params = GetResponseBodyParams::new(request_id.clone());
    match page.execute(params).await {
        Ok(reply) => {
            let result = reply.result;
            if result.base64_encoded {
                match STANDARD.decode(result.body.as_bytes()) {
                    Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(err) => {
                        trace!(error = %err, "response body base64 decode failed");
                        None
                    }
                }
            } else {
                Some(result.body)
            }
        }
        Err(err) => {
            trace!(request = ?request_id, error = %err, "response body unavailable");
            None
        }
    }
}

fn resource_kind_from_cdp(kind: &ResourceType) -> ResourceKind {
    match kind {
        ResourceType::Xhr => ResourceKind::Xhr,
        ResourceType::Fetch => ResourceKind::Fetch,
        ResourceType::Document => ResourceKind::Document,
        ResourceType::Script => ResourceKind::Script,
        ResourceType::Stylesheet => ResourceKind::Stylesheet,
        ResourceType::Image => ResourceKind::Image,
        ResourceType::Media => ResourceKind::Media,
        ResourceType::Font => ResourceKind::Font,
        ResourceType::WebSocket => ResourceKind::Websocket,
        other => ResourceKind::Other(format!("{other:?}").to_lowercase()),
    }
}

fn header_map(headers: &Headers) -> HashMap<String, String> {
    match serde_json::to_value(headers) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                };
                (name, value)
            })
            .collect(),
        _ => HashMap::new(),
    }
}
