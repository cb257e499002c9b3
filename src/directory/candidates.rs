//! Candidate request shapes for directory session capabilities
//!
//! The directory does not expose a single stable endpoint for issuing session
//! tokens or magic links, so both are configured as ordered lists of request
//! shapes. Each candidate names the path (with `{memberId}` substituted), an
//! optional JSON body (with `{memberId}` and `{redirectUrl}` substituted inside
//! string values) and the dotted response fields to look at.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

const MAX_TOKEN_LEN: usize = 8192;

static TOKEN_CHARSET: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._~+/=\-]+$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CandidateMethod {
    Get,
    Post,
    Put,
    Patch,
}

impl CandidateMethod {
    #[must_use]
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCandidate {
    pub method: CandidateMethod,
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
    pub response_fields: Vec<String>,
    /// Falls back to the directory request timeout
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Values substituted into candidate paths and bodies
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub member_id: &'a str,
    pub redirect_url: &'a str,
}

impl EndpointCandidate {
    #[must_use]
    pub fn render_path(&self, vars: &TemplateVars<'_>) -> String {
        self.path
            .replace("{memberId}", &urlencoding::encode(vars.member_id))
    }

    #[must_use]
    pub fn render_body(&self, vars: &TemplateVars<'_>) -> Option<Value> {
        self.body.as_ref().map(|body| substitute(body, vars))
    }

    /// First configured response field holding a string, if any
    #[must_use]
    pub fn extract<'v>(&self, response: &'v Value) -> Option<&'v str> {
        self.response_fields
            .iter()
            .find_map(|field| lookup_path(response, field))
    }
}

fn substitute(value: &Value, vars: &TemplateVars<'_>) -> Value {
    match value {
        Value::String(s) => Value::String(
            s.replace("{memberId}", vars.member_id)
                .replace("{redirectUrl}", vars.redirect_url),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn lookup_path<'v>(value: &'v Value, dotted: &str) -> Option<&'v str> {
    dotted
        .split('.')
        .try_fold(value, |current, segment| current.get(segment))
        .and_then(Value::as_str)
}

/// A session token is forwarded to the browser only if it is a single
/// printable run of token characters
#[must_use]
pub fn is_usable_token(token: &str) -> bool {
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return false;
    }
    TOKEN_CHARSET
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(token))
}

/// A magic link must be an absolute http(s) URL with a host
#[must_use]
pub fn is_usable_link(link: &str) -> bool {
    if link.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    Url::parse(link)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

fn token_fields() -> Vec<String> {
    ["data.token", "token", "sessionToken", "data.sessionToken"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn link_fields() -> Vec<String> {
    ["data.url", "url", "data.link", "link", "data.magicLink", "magicLink"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[must_use]
pub fn default_token_candidates() -> Vec<EndpointCandidate> {
    vec![
        EndpointCandidate {
            method: CandidateMethod::Post,
            path: "/members/{memberId}/token".to_string(),
            body: Some(json!({})),
            response_fields: token_fields(),
            timeout_seconds: None,
        },
        EndpointCandidate {
            method: CandidateMethod::Post,
            path: "/members/{memberId}/session-token".to_string(),
            body: Some(json!({})),
            response_fields: token_fields(),
            timeout_seconds: None,
        },
    ]
}

#[must_use]
pub fn default_magic_link_candidates() -> Vec<EndpointCandidate> {
    vec![
        EndpointCandidate {
            method: CandidateMethod::Post,
            path: "/members/{memberId}/magic-link".to_string(),
            body: Some(json!({ "redirectUrl": "{redirectUrl}" })),
            response_fields: link_fields(),
            timeout_seconds: None,
        },
        EndpointCandidate {
            method: CandidateMethod::Post,
            path: "/members/magic-link".to_string(),
            body: Some(json!({ "memberId": "{memberId}", "redirectUrl": "{redirectUrl}" })),
            response_fields: link_fields(),
            timeout_seconds: None,
        },
    ]
}
