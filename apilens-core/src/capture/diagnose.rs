use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Category a raw failure is normalized into. The order of
/// `PATTERN_TABLE` below decides precedence; `Server`, `Client` and
/// `Unknown` are status-bucket fallbacks and carry no patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cors,
    Ssl,
    Dns,
    Connection,
    Timeout,
    Network,
    Proxy,
    Redirect,
    PageError,
    DnsBlocked,
    Server,
    Client,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Cors => "cors",
            ErrorKind::Ssl => "ssl",
            ErrorKind::Dns => "dns",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Proxy => "proxy",
            ErrorKind::Redirect => "redirect",
            ErrorKind::PageError => "page_error",
            ErrorKind::DnsBlocked => "dns_blocked",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cors" => Ok(ErrorKind::Cors),
            "ssl" => Ok(ErrorKind::Ssl),
            "dns" => Ok(ErrorKind::Dns),
            "connection" => Ok(ErrorKind::Connection),
            "timeout" => Ok(ErrorKind::Timeout),
            "network" => Ok(ErrorKind::Network),
            "proxy" => Ok(ErrorKind::Proxy),
            "redirect" => Ok(ErrorKind::Redirect),
            "page_error" => Ok(ErrorKind::PageError),
            "dns_blocked" => Ok(ErrorKind::DnsBlocked),
            "server" => Ok(ErrorKind::Server),
            "client" => Ok(ErrorKind::Client),
            "unknown" => Ok(ErrorKind::Unknown),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// Raw material for classification. Every field is folded into one
/// lower-cased haystack; `status` only matters when no pattern matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureDetails {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl FailureDetails {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn haystack(&self) -> String {
        let mut text = self.message.clone();
        for extra in [&self.code, &self.name, &self.stack].into_iter().flatten() {
            text.push(' ');
            text.push_str(extra);
        }
        text.to_lowercase()
    }
}

/// First kind whose pattern set hits the haystack wins.
const PATTERN_TABLE: &[(&[&str], ErrorKind)] = &[
    (
        &["cors", "cross-origin", "access-control-allow-origin"],
        ErrorKind::Cors,
    ),
    (
        &["err_cert", "err_ssl", "ssl", "certificate"],
        ErrorKind::Ssl,
    ),
    (
        &[
            "err_name_not_resolved",
            "dns_probe",
            "getaddrinfo",
            "enotfound",
            "name not resolved",
            "could not resolve",
        ],
        ErrorKind::Dns,
    ),
    (
        &[
            "err_connection_refused",
            "err_connection_reset",
            "err_connection_closed",
            "err_connection_failed",
            "err_connection_aborted",
            "econnrefused",
            "econnreset",
            "connection refused",
            "connection reset",
        ],
        ErrorKind::Connection,
    ),
    (
        &["timeout", "timed out", "timed_out", "etimedout"],
        ErrorKind::Timeout,
    ),
    (
        &[
            "err_internet_disconnected",
            "err_network",
            "network error",
            "network changed",
            "enetunreach",
        ],
        ErrorKind::Network,
    ),
    (&["err_proxy", "err_tunnel", "proxy"], ErrorKind::Proxy),
    (
        &["err_too_many_redirects", "redirect"],
        ErrorKind::Redirect,
    ),
    (
        &[
            "page crashed",
            "target closed",
            "session closed",
            "frame detached",
            "navigation failed",
            "err_aborted",
        ],
        ErrorKind::PageError,
    ),
    (
        &[
            "err_blocked_by_client",
            "err_blocked_by_response",
            "err_blocked_by_administrator",
            "blocked by",
        ],
        ErrorKind::DnsBlocked,
    ),
];

struct KindProfile {
    title: &'static str,
    message: &'static str,
    suggestions: &'static [&'static str],
    retryable: bool,
}

fn profile(kind: ErrorKind) -> KindProfile {
    match kind {
        ErrorKind::Cors => KindProfile {
            title: "Cross-origin request blocked",
            message: "The page's scripts were blocked by the browser's CORS policy.",
            suggestions: &[
                "Capture the API host directly instead of the embedding page",
                "Check whether the API sends Access-Control-Allow-Origin",
            ],
            retryable: false,
        },
        ErrorKind::Ssl => KindProfile {
            title: "TLS certificate problem",
            message: "The server presented a certificate the browser refused.",
            suggestions: &[
                "Verify the certificate chain with the site operator",
                "Try the http:// variant only if the site intentionally serves it",
            ],
            retryable: false,
        },
        ErrorKind::Dns => KindProfile {
            title: "Hostname could not be resolved",
            message: "DNS resolution failed for the requested host.",
            suggestions: &[
                "Check the URL for typos in the hostname",
                "Confirm the domain is publicly resolvable",
                "Retry; transient resolver failures are common",
            ],
            retryable: true,
        },
        ErrorKind::Connection => KindProfile {
            title: "Connection failed",
            message: "The host refused or dropped the TCP connection.",
            suggestions: &[
                "Confirm the service is up and listening on the expected port",
                "Retry; the host may be restarting",
            ],
            retryable: true,
        },
        ErrorKind::Timeout => KindProfile {
            title: "Operation timed out",
            message: "The page or one of its requests took too long to answer.",
            suggestions: &[
                "Retry with a longer navigation timeout",
                "Check whether the site is under heavy load",
            ],
            retryable: true,
        },
        ErrorKind::Network => KindProfile {
            title: "Network unavailable",
            message: "The browser lost network connectivity during the capture.",
            suggestions: &[
                "Check the machine's network link",
                "Retry once connectivity is restored",
            ],
            retryable: true,
        },
        ErrorKind::Proxy => KindProfile {
            title: "Proxy failure",
            message: "The configured proxy rejected or failed the connection.",
            suggestions: &[
                "Validate the proxy address and credentials",
                "Retry without a proxy to isolate the failure",
            ],
            retryable: true,
        },
        ErrorKind::Redirect => KindProfile {
            title: "Redirect loop",
            message: "The site kept redirecting without reaching a final page.",
            suggestions: &[
                "Open the URL manually and note where it settles",
                "Capture the post-login page when auth redirects are involved",
            ],
            retryable: false,
        },
        ErrorKind::PageError => KindProfile {
            title: "Page crashed or closed",
            message: "The tab crashed or was closed before the capture finished.",
            suggestions: &[
                "Retry the capture",
                "Reduce the capture window if the page is very heavy",
            ],
            retryable: true,
        },
        ErrorKind::DnsBlocked => KindProfile {
            title: "Request blocked",
            message: "A filter (ad blocker, DNS filter or policy) blocked the request.",
            suggestions: &[
                "Disable content filters for this profile",
                "Check corporate DNS policy for the domain",
            ],
            retryable: false,
        },
        ErrorKind::Server => KindProfile {
            title: "Server error",
            message: "The server answered with a 5xx status.",
            suggestions: &[
                "Retry; server-side errors are often transient",
                "Check the service's status page",
            ],
            retryable: true,
        },
        ErrorKind::Client => KindProfile {
            title: "Request rejected",
            message: "The server answered with a 4xx status.",
            suggestions: &[
                "Verify the URL and any required authentication",
                "Inspect the captured request for missing headers",
            ],
            retryable: false,
        },
        ErrorKind::Unknown => KindProfile {
            title: "Unrecognized failure",
            message: "The failure did not match any known pattern.",
            suggestions: &["Check the original error text for details"],
            retryable: false,
        },
    }
}

/// Deterministic classification of one failure. Pure value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub title: String,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl ErrorClassification {
    fn for_kind(kind: ErrorKind) -> Self {
        let profile = profile(kind);
        Self {
            kind,
            retryable: profile.retryable,
            title: profile.title.to_string(),
            message: profile.message.to_string(),
            suggestions: profile.suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn max_retries(&self) -> usize {
        if self.retryable {
            DEFAULT_MAX_RETRIES
        } else {
            0
        }
    }
}

pub fn classify_failure(details: &FailureDetails) -> ErrorClassification {
    let haystack = details.haystack();
    for (patterns, kind) in PATTERN_TABLE {
        if patterns.iter().any(|pattern| haystack.contains(pattern)) {
            return ErrorClassification::for_kind(*kind);
        }
    }
    match details.status {
        Some(status) if status >= 500 => ErrorClassification::for_kind(ErrorKind::Server),
        Some(status) if status >= 400 => ErrorClassification::for_kind(ErrorKind::Client),
        _ => ErrorClassification::for_kind(ErrorKind::Unknown),
    }
}

pub fn classify_message(message: &str) -> ErrorClassification {
    classify_failure(&FailureDetails::from_message(message))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalError {
    pub message: String,
    pub code: Option<String>,
    pub name: Option<String>,
    pub stack: Option<String>,
}

/// Boundary payload: the classification plus the untouched original error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub title: String,
    pub message: String,
    pub suggestions: Vec<String>,
    pub retryable: bool,
    pub original_error: OriginalError,
}

impl ErrorReport {
    pub fn from_details(details: FailureDetails) -> Self {
        let classification = classify_failure(&details);
        Self {
            kind: classification.kind,
            title: classification.title,
            message: classification.message,
            suggestions: classification.suggestions,
            retryable: classification.retryable,
            original_error: OriginalError {
                message: details.message,
                code: details.code,
                name: details.name,
                stack: details.stack,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_not_resolved_is_retryable_dns() {
        let classification = classify_message("net::ERR_NAME_NOT_RESOLVED");
        assert_eq!(classification.kind, ErrorKind::Dns);
        assert!(classification.retryable);
        assert_eq!(classification.max_retries(), 3);
    }

    #[test]
    fn earlier_table_entries_shadow_later_ones() {
        // Both cors and timeout would match; cors sits first in the table.
        let classification = classify_message("CORS preflight timeout");
        assert_eq!(classification.kind, ErrorKind::Cors);
    }

    #[test]
    fn blocked_requests_are_not_retried() {
        let classification = classify_message("net::ERR_BLOCKED_BY_CLIENT");
        assert_eq!(classification.kind, ErrorKind::DnsBlocked);
        assert!(!classification.retryable);
        assert_eq!(classification.max_retries(), 0);
    }

    #[test]
    fn status_buckets_apply_only_without_pattern_match() {
        let server = classify_failure(&FailureDetails::from_message("upstream broke").with_status(503));
        assert_eq!(server.kind, ErrorKind::Server);
        assert!(server.retryable);

        let client = classify_failure(&FailureDetails::from_message("nope").with_status(404));
        assert_eq!(client.kind, ErrorKind::Client);
        assert!(!client.retryable);

        // A pattern hit must win even when a status is present.
        let dns = classify_failure(
            &FailureDetails::from_message("getaddrinfo ENOTFOUND api.example").with_status(502),
        );
        assert_eq!(dns.kind, ErrorKind::Dns);
    }

    #[test]
    fn code_and_name_feed_the_haystack() {
        let classification = classify_failure(
            &FailureDetails::from_message("request failed").with_code("ECONNREFUSED"),
        );
        assert_eq!(classification.kind, ErrorKind::Connection);
    }

    #[test]
    fn unmatched_failure_without_status_is_unknown() {
        let classification = classify_message("something odd happened");
        assert_eq!(classification.kind, ErrorKind::Unknown);
        assert!(!classification.retryable);
        assert!(!classification.suggestions.is_empty());
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in [ErrorKind::PageError, ErrorKind::DnsBlocked, ErrorKind::Cors] {
            assert_eq!(kind.as_str().parse::<ErrorKind>(), Ok(kind));
        }
        assert!("page-error".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn report_keeps_the_original_error_and_tags_the_type() {
        let details = FailureDetails::from_message("net::ERR_CONNECTION_RESET")
            .with_name("TypeError");
        let report = ErrorReport::from_details(details);
        assert_eq!(report.kind, ErrorKind::Connection);
        assert!(report.retryable);
        assert_eq!(report.original_error.message, "net::ERR_CONNECTION_RESET");
        assert_eq!(report.original_error.name.as_deref(), Some("TypeError"));

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["type"], "connection");
        assert_eq!(json["original_error"]["message"], "net::ERR_CONNECTION_RESET");
    }
}
