use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use super::event::{NetworkEvent, RequestEvent, ResourceKind, ResponseEvent};
use super::graphql::{parse_graphql_body, GraphqlInfo};
use super::ratelimit::{parse_rate_limit_headers, RateLimitInfo};

const PATH_MARKERS: &[&str] = &[
    "/api/", "/v1/", "/v2/", "/v3/", "/graphql", "/rest/", "/rpc/", ".json",
];

const URL_KEYWORDS: &[&str] = &[
    "auth", "login", "token", "user", "data", "query", "mutation",
];

/// A classified, potentially response-correlated request captured during one
/// page visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRecord {
    pub id: u64,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub payload: Option<String>,
    pub resource_kind: ResourceKind,
    pub timestamp: DateTime<Utc>,
    pub authentication: Option<AuthenticationInfo>,
    pub graphql: Option<GraphqlInfo>,
    pub explanations: Vec<String>,
    pub response: Option<ResponseRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body_text: Option<String>,
    pub rate_limit: Option<RateLimitInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    Bearer,
    Basic,
    ApiKey,
    Cookie,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Bearer => "bearer",
            AuthScheme::Basic => "basic",
            AuthScheme::ApiKey => "api_key",
            AuthScheme::Cookie => "cookie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub scheme: AuthScheme,
    /// Header the marker was found in.
    pub header: String,
}

type RulePredicate = fn(&RequestEvent) -> bool;

/// Ordered classification rules; the first matching rule wins and anything
/// that matches none is discarded.
pub(crate) const CLASSIFICATION_RULES: &[(&str, RulePredicate)] = &[
    ("resource_kind", rule_resource_kind),
    ("api_path", rule_api_path),
    ("url_keyword", rule_url_keyword),
    ("content_type", rule_content_type),
];

pub(crate) fn matching_rule(request: &RequestEvent) -> Option<&'static str> {
    CLASSIFICATION_RULES
        .iter()
        .find(|(_, predicate)| predicate(request))
        .map(|(name, _)| *name)
}

fn rule_resource_kind(request: &RequestEvent) -> bool {
    request.resource_kind.is_api_like()
}

fn rule_api_path(request: &RequestEvent) -> bool {
    match Url::parse(&request.url) {
        Ok(parsed) => path_has_marker(parsed.path()),
        Err(_) => path_has_marker(&request.url),
    }
}

fn path_has_marker(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    PATH_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn rule_url_keyword(request: &RequestEvent) -> bool {
    let lowered = request.url.to_ascii_lowercase();
    URL_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

fn rule_content_type(request: &RequestEvent) -> bool {
    header_value(&request.headers, "content-type")
        .map(|value| {
            let lowered = value.to_ascii_lowercase();
            lowered.contains("application/json") || lowered.contains("application/xml")
        })
        .unwrap_or(false)
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

pub fn detect_authentication(headers: &HashMap<String, String>) -> Option<AuthenticationInfo> {
    if let Some(value) = header_value(headers, "authorization") {
        let lowered = value.to_ascii_lowercase();
        let scheme = if lowered.starts_with("bearer") {
            AuthScheme::Bearer
        } else if lowered.starts_with("basic") {
            AuthScheme::Basic
        } else {
            AuthScheme::ApiKey
        };
        return Some(AuthenticationInfo {
            scheme,
            header: "authorization".to_string(),
        });
    }
    for name in ["x-api-key", "api-key", "x-auth-token"] {
        if header_value(headers, name).is_some() {
            return Some(AuthenticationInfo {
                scheme: AuthScheme::ApiKey,
                header: name.to_string(),
            });
        }
    }
    if header_value(headers, "cookie").is_some() {
        return Some(AuthenticationInfo {
            scheme: AuthScheme::Cookie,
            header: "cookie".to_string(),
        });
    }
    None
}

fn explain(request: &RequestEvent, rule: &str) -> Vec<String> {
    let mut notes = Vec::new();
    match request.method.to_ascii_uppercase().as_str() {
        "GET" => notes.push("Reads data from the server".to_string()),
        "POST" => notes.push("Sends data to the server".to_string()),
        "PUT" | "PATCH" => notes.push("Updates a server-side resource".to_string()),
        "DELETE" => notes.push("Deletes a server-side resource".to_string()),
        other => notes.push(format!("{other} request")),
    }

    let lowered = request.url.to_ascii_lowercase();
    if lowered.contains("graphql") {
        notes.push("Talks to a GraphQL endpoint".to_string());
    }
    if ["auth", "login", "token"]
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        notes.push("Authentication or session related".to_string());
    }
    if rule_content_type(request) {
        notes.push("Carries a structured request body".to_string());
    }
    if rule == "resource_kind" {
        notes.push(format!(
            "Background {} call issued by page scripts",
            request.resource_kind
        ));
    }
    notes
}

/// Per-capture classifier state. One instance per capture; instances share
/// nothing, so concurrent captures cannot interfere.
#[derive(Debug, Default)]
pub struct TrafficClassifier {
    next_id: u64,
    records: Vec<ApiRecord>,
}

impl TrafficClassifier {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            records: Vec::new(),
        }
    }

    /// Feeds one event through classification or correlation. Returns the
    /// record the event produced or completed, if any.
    pub fn ingest(&mut self, event: NetworkEvent) -> Option<&ApiRecord> {
        match event {
            NetworkEvent::Request(request) => self.classify_request(request),
            NetworkEvent::Response(response) => self.correlate_response(response),
        }
    }

    /// Applies the rule table to a request. A request matching no rule is
    /// discarded and never becomes a record, regardless of what its response
    /// later looks like.
    pub fn classify_request(&mut self, request: RequestEvent) -> Option<&ApiRecord> {
        let rule = match matching_rule(&request) {
            Some(rule) => rule,
            None => {
                trace!(url = %request.url, resource = %request.resource_kind, "request discarded");
                return None;
            }
        };

        let id = self.next_id;
        self.next_id += 1;

        let authentication = detect_authentication(&request.headers);
        let graphql = if request.url.to_ascii_lowercase().contains("graphql") {
            request.body.as_deref().and_then(parse_graphql_body)
        } else {
            None
        };
        let explanations = explain(&request, rule);

        debug!(id, rule, url = %request.url, "classified api request");
        self.records.push(ApiRecord {
            id,
            url: request.url,
            method: request.method,
            headers: request.headers,
            payload: request.body,
            resource_kind: request.resource_kind,
            timestamp: Utc::now(),
            authentication,
            graphql,
            explanations,
            response: None,
        });
        self.records.last()
    }

    /// Attaches a response to the first record with an identical URL and no
    /// response yet; the first correlated response wins and later duplicates
    /// are dropped. Responses for unclassified requests are dropped too.
    ///
    /// Concurrent requests sharing a URL make this ambiguous by design; the
    /// browser gives no stable ordering, and creation order is used as-is.
    pub fn correlate_response(&mut self, response: ResponseEvent) -> Option<&ApiRecord> {
        let index = self
            .records
            .iter()
            .position(|record| record.response.is_none() && record.url == response.url);
        let index = match index {
            Some(index) => index,
            None => {
                trace!(url = %response.url, status = response.status, "response dropped");
                return None;
            }
        };

        let rate_limit = parse_rate_limit_headers(&response.headers);
        let record = &mut self.records[index];
        record.response = Some(ResponseRecord {
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            body_text: response.body_text,
            rate_limit,
        });
        debug!(id = record.id, url = %record.url, status = response.status, "response correlated");
        self.records.get(index)
    }

    pub fn records(&self) -> &[ApiRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ApiRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records still waiting for a response, kept as pending at capture end.
    pub fn pending(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.response.is_none())
            .count()
    }
}
