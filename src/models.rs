use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// Claims of an ID token that passed every verification step
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub full_name: Option<String>,
    pub nonce: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub raw: Value,
}

/// Provider-independent identity used for the directory upsert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedProfile {
    pub subject: String,
    /// Trimmed and lower-cased; the directory join key
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub display_name: String,
    pub raw_claims: Value,
}

/// A member as returned by the directory; only `id` and `email` are relied on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

/// Contents of the sealed application session cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSession {
    pub email: String,
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "memberId")]
    pub member_id: Option<String>,
    /// Unix timestamp (milliseconds)
    #[serde(rename = "issuedAt")]
    pub issued_at: i64,
}

/// How the browser ended up with (or without) a directory session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionMechanism {
    #[serde(rename = "token")]
    Token,
    #[serde(rename = "magicLink")]
    MagicLink,
    #[serde(rename = "redirectOnly")]
    RedirectOnly,
}

impl SessionMechanism {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::MagicLink => "magicLink",
            Self::RedirectOnly => "redirectOnly",
        }
    }
}

impl std::fmt::Display for SessionMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of the session establishment cascade
#[derive(Clone, PartialEq, Eq)]
pub enum SessionEstablishmentResult {
    /// Session token for the browser-side bridging script
    Token { token: String, destination: String },
    /// One-time login link the browser is redirected to
    MagicLink { url: String },
    /// Plain redirect; the user lands without a directory session
    RedirectOnly { destination: String },
}

impl SessionEstablishmentResult {
    #[must_use]
    pub fn mechanism(&self) -> SessionMechanism {
        match self {
            Self::Token { .. } => SessionMechanism::Token,
            Self::MagicLink { .. } => SessionMechanism::MagicLink,
            Self::RedirectOnly { .. } => SessionMechanism::RedirectOnly,
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::RedirectOnly { .. })
    }

    /// The non-fatal error a degraded outcome stands for
    #[must_use]
    pub fn degradation(&self) -> Option<crate::error::AuthFlowError> {
        self.is_degraded()
            .then_some(crate::error::AuthFlowError::SessionUnavailable)
    }
}

// Tokens and login links are bearer credentials; keep them out of debug output.
impl std::fmt::Debug for SessionEstablishmentResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token { destination, .. } => f
                .debug_struct("Token")
                .field("token", &"<redacted>")
                .field("destination", destination)
                .finish(),
            Self::MagicLink { .. } => f
                .debug_struct("MagicLink")
                .field("url", &"<redacted>")
                .finish(),
            Self::RedirectOnly { destination } => f
                .debug_struct("RedirectOnly")
                .field("destination", destination)
                .finish(),
        }
    }
}
