use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::classifier::{ApiRecord, TrafficClassifier};
use super::event::NetworkEvent;
use super::metrics::CaptureMetrics;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observer for live classification progress. Implementations must be quick;
/// calls are fire-and-forget from the capture task.
pub trait ProgressSink: Send + Sync {
    fn record_classified(&self, record: &ApiRecord);
    fn response_correlated(&self, record: &ApiRecord);
}

/// Sender half of one capture's event channel, handed to the browser
/// collaborator. Cheap to clone.
#[derive(Clone)]
pub struct CaptureFeed {
    sender: mpsc::Sender<NetworkEvent>,
}

impl CaptureFeed {
    /// Queues an event without ever blocking the collaborator's dispatch.
    /// Returns false when the event was dropped (channel full or capture
    /// already finished).
    pub fn push(&self, event: NetworkEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(url = %event.url(), "capture channel full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// One capture's channel. Each capture gets its own pair, so no capture can
/// block or observe another.
pub fn capture_channel(capacity: usize) -> (CaptureFeed, mpsc::Receiver<NetworkEvent>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (CaptureFeed { sender }, receiver)
}

pub struct CaptureOptions {
    pub window: Duration,
    pub cancel: CancellationToken,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl CaptureOptions {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureOutcome {
    pub records: Vec<ApiRecord>,
    pub metrics: CaptureMetrics,
    /// Records that never saw a response before the capture ended.
    pub pending: usize,
    pub deadline_hit: bool,
    pub cancelled: bool,
}

/// Consumes one capture's events until the feed closes, the window expires
/// or the capture is cancelled. Expiry and cancellation truncate gracefully:
/// whatever was classified so far is returned, pending records included.
pub async fn run_capture(
    mut events: mpsc::Receiver<NetworkEvent>,
    options: CaptureOptions,
) -> CaptureOutcome {
    let deadline = Instant::now() + options.window;
    let mut classifier = TrafficClassifier::new();
    let mut metrics = CaptureMetrics::default();
    let mut deadline_hit = false;
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = options.cancel.cancelled() => {
                cancelled = true;
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                deadline_hit = true;
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        process_event(event, &mut classifier, &mut metrics, options.progress.as_deref());
                    }
                    None => break,
                }
            }
        }
    }

    let pending = classifier.pending();
    let records = classifier.into_records();
    info!(
        records = records.len(),
        pending,
        events = metrics.events_seen,
        deadline_hit,
        cancelled,
        "capture finished"
    );
    CaptureOutcome {
        records,
        metrics,
        pending,
        deadline_hit,
        cancelled,
    }
}

fn process_event(
    event: NetworkEvent,
    classifier: &mut TrafficClassifier,
    metrics: &mut CaptureMetrics,
    progress: Option<&dyn ProgressSink>,
) {
    metrics.record_event();
    match event {
        NetworkEvent::Request(request) => match classifier.classify_request(request) {
            Some(record) => {
                metrics.record_classification();
                if let Some(sink) = progress {
                    sink.record_classified(record);
                }
            }
            None => metrics.record_discard(),
        },
        NetworkEvent::Response(response) => match classifier.correlate_response(response) {
            Some(record) => {
                let rate_limited = record
                    .response
                    .as_ref()
                    .is_some_and(|response| response.rate_limit.is_some());
                metrics.record_correlation(rate_limited);
                if let Some(sink) = progress {
                    sink.response_correlated(record);
                }
            }
            None => metrics.record_dropped_response(),
        },
    }
}
