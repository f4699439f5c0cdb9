use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource type reported by the browser for a network request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceKind {
    Xhr,
    Fetch,
    Document,
    Script,
    Stylesheet,
    Image,
    Media,
    Font,
    Websocket,
    Other(String),
}

impl ResourceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Xhr => "xhr",
            ResourceKind::Fetch => "fetch",
            ResourceKind::Document => "document",
            ResourceKind::Script => "script",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::Image => "image",
            ResourceKind::Media => "media",
            ResourceKind::Font => "font",
            ResourceKind::Websocket => "websocket",
            ResourceKind::Other(raw) => raw.as_str(),
        }
    }

    pub fn is_api_like(&self) -> bool {
        matches!(self, ResourceKind::Xhr | ResourceKind::Fetch)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ResourceKind {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "xhr" => ResourceKind::Xhr,
            "fetch" => ResourceKind::Fetch,
            "document" => ResourceKind::Document,
            "script" => ResourceKind::Script,
            "stylesheet" => ResourceKind::Stylesheet,
            "image" => ResourceKind::Image,
            "media" => ResourceKind::Media,
            "font" => ResourceKind::Font,
            "websocket" => ResourceKind::Websocket,
            other => ResourceKind::Other(other.to_string()),
        }
    }
}

impl From<String> for ResourceKind {
    fn from(value: String) -> Self {
        ResourceKind::from(value.as_str())
    }
}

impl From<ResourceKind> for String {
    fn from(value: ResourceKind) -> Self {
        value.as_str().to_string()
    }
}

/// One network event delivered by the browser collaborator. Events are
/// ephemeral: they exist on the capture channel and are consumed by the
/// classifier, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetworkEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub resource_kind: ResourceKind,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body_text: Option<String>,
}

impl NetworkEvent {
    pub fn url(&self) -> &str {
        match self {
            NetworkEvent::Request(request) => &request.url,
            NetworkEvent::Response(response) => &response.url,
        }
    }
}
