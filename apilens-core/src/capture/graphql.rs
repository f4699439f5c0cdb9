use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphqlOperation {
    Query,
    Mutation,
    Subscription,
}

impl GraphqlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphqlOperation::Query => "query",
            GraphqlOperation::Mutation => "mutation",
            GraphqlOperation::Subscription => "subscription",
        }
    }
}

/// Best-effort breakdown of a GraphQL request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlInfo {
    pub operation: GraphqlOperation,
    pub name: Option<String>,
    pub fields: Vec<String>,
}

/// Extracts operation kind, name and top-level field list from a request
/// body. The body is either the usual `{"query": "..."}` JSON envelope or a
/// bare query string. Anything malformed yields `None`, never an error.
pub fn parse_graphql_body(body: &str) -> Option<GraphqlInfo> {
    let query = extract_query_text(body)?;
    parse_query_text(&query)
}

fn extract_query_text(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return value
            .get("query")
            .and_then(Value::as_str)
            .map(str::to_string);
    }
    let trimmed = body.trim_start();
    if trimmed.starts_with('{')
        || trimmed.starts_with("query")
        || trimmed.starts_with("mutation")
        || trimmed.starts_with("subscription")
    {
        return Some(body.to_string());
    }
    None
}

fn parse_query_text(query: &str) -> Option<GraphqlInfo> {
    let head = Regex::new(r"^\s*(query|mutation|subscription)\b(?:\s+([A-Za-z_][A-Za-z0-9_]*))?")
        .expect("valid regex");

    let trimmed = query.trim_start();
    let (operation, name) = if let Some(captures) = head.captures(trimmed) {
        let operation = match captures.get(1).map(|m| m.as_str()) {
            Some("mutation") => GraphqlOperation::Mutation,
            Some("subscription") => GraphqlOperation::Subscription,
            _ => GraphqlOperation::Query,
        };
        (operation, captures.get(2).map(|m| m.as_str().to_string()))
    } else if trimmed.starts_with('{') {
        // Shorthand form: an anonymous query.
        (GraphqlOperation::Query, None)
    } else {
        return None;
    };

    Some(GraphqlInfo {
        operation,
        name,
        fields: top_level_fields(trimmed),
    })
}

/// Collects the field names of the outermost selection set. Arguments and
/// nested selections are skipped; aliases resolve to the aliased field.
fn top_level_fields(query: &str) -> Vec<String> {
    let Some(start) = query.find('{') else {
        return Vec::new();
    };

    let mut fields = Vec::new();
    let mut pending = String::new();
    let mut brace_depth = 0usize;
    let mut paren_depth = 0usize;

    for ch in query[start..].chars() {
        match ch {
            '{' => {
                flush_field(&mut pending, &mut fields, brace_depth, paren_depth);
                brace_depth += 1;
            }
            '}' => {
                flush_field(&mut pending, &mut fields, brace_depth, paren_depth);
                brace_depth = brace_depth.saturating_sub(1);
                if brace_depth == 0 {
                    break;
                }
            }
            '(' => {
                flush_field(&mut pending, &mut fields, brace_depth, paren_depth);
                paren_depth += 1;
            }
            ')' => paren_depth = paren_depth.saturating_sub(1),
            ':' => {
                // An alias; the real field name follows.
                pending.clear();
            }
            ch if ch.is_alphanumeric() || ch == '_' => {
                if brace_depth == 1 && paren_depth == 0 {
                    pending.push(ch);
                }
            }
            _ => flush_field(&mut pending, &mut fields, brace_depth, paren_depth),
        }
    }
    fields
}

fn flush_field(pending: &mut String, fields: &mut Vec<String>, brace_depth: usize, paren_depth: usize) {
    if brace_depth == 1 && paren_depth == 0 && !pending.is_empty() {
        fields.push(std::mem::take(pending));
    } else {
        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_query_in_json_envelope() {
        let body = r#"{"query":"query GetUser($id: ID!) { user(id: $id) { name email } viewer { id } }","variables":{"id":"1"}}"#;
        let info = parse_graphql_body(body).expect("parsed");
        assert_eq!(info.operation, GraphqlOperation::Query);
        assert_eq!(info.name.as_deref(), Some("GetUser"));
        assert_eq!(info.fields, vec!["user".to_string(), "viewer".to_string()]);
    }

    #[test]
    fn mutation_with_arguments() {
        let body = r#"{"query":"mutation AddItem { addItem(input: {name: \"x\"}) { id } }"}"#;
        let info = parse_graphql_body(body).expect("parsed");
        assert_eq!(info.operation, GraphqlOperation::Mutation);
        assert_eq!(info.name.as_deref(), Some("AddItem"));
        assert_eq!(info.fields, vec!["addItem".to_string()]);
    }

    #[test]
    fn anonymous_shorthand_query() {
        let info = parse_graphql_body("{ me { id } posts { title } }").expect("parsed");
        assert_eq!(info.operation, GraphqlOperation::Query);
        assert_eq!(info.name, None);
        assert_eq!(info.fields, vec!["me".to_string(), "posts".to_string()]);
    }

    #[test]
    fn alias_resolves_to_the_aliased_field() {
        let info = parse_graphql_body("query { current: viewer { id } }").expect("parsed");
        assert_eq!(info.fields, vec!["viewer".to_string()]);
    }

    #[test]
    fn subscription_without_selection_keeps_empty_fields() {
        let info = parse_graphql_body(r#"{"query":"subscription OnPing"}"#).expect("parsed");
        assert_eq!(info.operation, GraphqlOperation::Subscription);
        assert_eq!(info.name.as_deref(), Some("OnPing"));
        assert!(info.fields.is_empty());
    }

    #[test]
    fn malformed_payloads_yield_none() {
        assert_eq!(parse_graphql_body("not graphql at all"), None);
        assert_eq!(parse_graphql_body(r#"{"variables":{}}"#), None);
        assert_eq!(parse_graphql_body(""), None);
    }
}
