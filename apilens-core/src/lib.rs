pub mod capture;
pub mod config;
pub mod error;
pub mod service;
pub mod session;

pub use capture::{
    classify_failure, classify_message, parse_graphql_body, parse_rate_limit_headers, ApiRecord,
    CaptureDriver, CaptureError, CaptureMetrics, CaptureOutcome, CaptureResult, ChromeDriver,
    ErrorClassification, ErrorKind, ErrorReport, FailureDetails, NetworkEvent, RateLimitInfo,
    ResourceKind, RetryError, RetryOptions, RetryPolicy, TrafficClassifier,
};
pub use config::{load_apilens_config, ApiLensConfig};
pub use error::{ConfigError, Result};
pub use service::{ApiLens, CaptureReport};
pub use session::{
    CleanupRequest, CleanupStats, Session, SessionStore, SessionView, StoreSettings,
};
