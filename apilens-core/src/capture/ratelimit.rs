use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Epoch values below this are read as seconds, above as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 10_000_000_000;

const APPROACHING_LIMIT_PERCENT: u32 = 20;

/// Quota metadata extracted from one response's headers. `None` from the
/// parser means "no recognized rate-limit header", which is not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Reset instant as epoch seconds.
    pub reset: Option<i64>,
    /// Seconds the server asked us to wait before the next request.
    pub retry_after: Option<u64>,
    /// Remaining quota as a rounded percentage of the limit.
    pub percentage: Option<u32>,
    pub is_approaching_limit: bool,
    pub limit_type: Option<String>,
}

/// Parses the recognized rate-limit dialects out of a header map.
///
/// Lookup is case-insensitive. The legacy `X-RateLimit-*` dialect (and its
/// `X-Rate-Limit-*` alias) wins over the combined `RateLimit:` header
/// whenever it carries a limit or a remaining count; `RateLimit-Policy` and
/// `Retry-After` are parsed independently and merged into the result.
pub fn parse_rate_limit_headers(headers: &HashMap<String, String>) -> Option<RateLimitInfo> {
    let lowered: HashMap<String, &str> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
        .collect();

    let mut limit = None;
    let mut remaining = None;
    let mut reset = None;

    let legacy_limit =
        first_header(&lowered, &["x-ratelimit-limit", "x-rate-limit-limit"]).and_then(parse_count);
    let legacy_remaining = first_header(&lowered, &["x-ratelimit-remaining", "x-rate-limit-remaining"])
        .and_then(parse_count);

    if legacy_limit.is_some() || legacy_remaining.is_some() {
        limit = legacy_limit;
        remaining = legacy_remaining;
        reset = first_header(&lowered, &["x-ratelimit-reset", "x-rate-limit-reset"])
            .and_then(parse_reset);
    } else if let Some(combined) = lowered.get("ratelimit") {
        let fields = parse_combined_fields(combined);
        limit = fields.get("limit").and_then(|value| parse_count(value));
        remaining = fields.get("remaining").and_then(|value| parse_count(value));
        reset = fields.get("reset").and_then(|value| parse_reset(value));
    }

    let policy = lowered.get("ratelimit-policy").and_then(|value| parse_policy(value));
    let retry_after = lowered.get("retry-after").and_then(|value| parse_retry_after(value));

    if limit.is_none() && remaining.is_none() && retry_after.is_none() {
        return None;
    }

    let percentage = match (limit, remaining) {
        (Some(limit), Some(remaining)) if limit > 0 => {
            Some(((remaining as f64 / limit as f64) * 100.0).round() as u32)
        }
        _ => None,
    };
    let is_approaching_limit = percentage.is_some_and(|value| value < APPROACHING_LIMIT_PERCENT);
    let limit_type = match policy {
        Some((requests, window)) => Some(format!("{requests} per {window}s")),
        None if limit.is_some() => Some("requests".to_string()),
        None => None,
    };

    Some(RateLimitInfo {
        limit,
        remaining,
        reset,
        retry_after,
        percentage,
        is_approaching_limit,
        limit_type,
    })
}

fn first_header<'a>(lowered: &'a HashMap<String, &str>, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| lowered.get(*name).copied())
}

fn parse_count(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

/// `RateLimit: limit=100, remaining=50, reset=60` into its key/value pairs.
fn parse_combined_fields(value: &str) -> HashMap<String, String> {
    value
        .split(',')
        .filter_map(|part| {
            let (key, field) = part.split_once('=')?;
            Some((key.trim().to_ascii_lowercase(), field.trim().to_string()))
        })
        .collect()
}

/// `RateLimit-Policy: 100;w=60` (first policy entry when several are listed).
fn parse_policy(value: &str) -> Option<(u64, u64)> {
    let entry = value.split(',').next()?;
    let mut parts = entry.split(';').map(str::trim);
    let requests = parts.next()?.parse().ok()?;
    let window = parts
        .find_map(|part| part.strip_prefix("w="))
        .and_then(|window| window.parse().ok())?;
    Some((requests, window))
}

/// Reset is an epoch timestamp in seconds or milliseconds, or an HTTP-date.
fn parse_reset(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(numeric) = value.parse::<i64>() {
        if numeric < EPOCH_MILLIS_THRESHOLD {
            return Some(numeric);
        }
        return Some(numeric / 1000);
    }
    parse_http_date(value).map(|date| date.timestamp())
}

/// Retry-After is delta-seconds or an HTTP-date converted to a delta.
fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let date = parse_http_date(value)?;
    let delta = date.timestamp() - Utc::now().timestamp();
    Some(delta.max(0) as u64)
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
