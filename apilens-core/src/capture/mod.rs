pub mod chrome;
pub mod classifier;
pub mod diagnose;
pub mod error;
pub mod event;
pub mod graphql;
pub mod metrics;
pub mod pipeline;
pub mod ratelimit;
pub mod retry;

pub use chrome::{CaptureDriver, ChromeDriver, DriverSettings};
pub use classifier::{
    ApiRecord, AuthScheme, AuthenticationInfo, ResponseRecord, TrafficClassifier,
};
pub use diagnose::{
    classify_failure, classify_message, ErrorClassification, ErrorKind, ErrorReport,
    FailureDetails,
};
pub use error::{CaptureError, CaptureResult};
pub use event::{NetworkEvent, RequestEvent, ResourceKind, ResponseEvent};
pub use graphql::{parse_graphql_body, GraphqlInfo, GraphqlOperation};
pub use metrics::CaptureMetrics;
pub use pipeline::{
    capture_channel, run_capture, CaptureFeed, CaptureOptions, CaptureOutcome, ProgressSink,
    EVENT_CHANNEL_CAPACITY,
};
pub use ratelimit::{parse_rate_limit_headers, RateLimitInfo};
pub use retry::{RetryError, RetryOptions, RetryOutcome, RetryPolicy};
