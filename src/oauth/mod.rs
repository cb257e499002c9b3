//! OpenID Connect client side of the login flow
//!
//! Discovery, the authorization redirect, the code exchange, ID token
//! verification and claim normalization.

pub mod authorize;
pub mod discovery;
pub mod jwt_validation;
pub mod profile;
pub mod token_exchange;

pub use authorize::{build_authorization_url, AuthorizationParams};
pub use discovery::{DiscoveryClient, OidcDiscoveryDocument};
pub use jwt_validation::{
    issuer_pattern_for_host, IdTokenError, IdTokenPolicy, IdTokenVerifier, JsonWebKey,
    JsonWebKeySet,
};
pub use profile::normalize_profile;
pub use token_exchange::{TokenExchangeClient, TokenSet};

use serde::Deserialize;

/// Query parameters the identity provider sends to the redirect URI
#[derive(Deserialize, Debug, Default, Clone)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Shared HTTP client for identity provider calls
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized
pub fn build_http_client(timeout: std::time::Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("memberbridge/", env!("CARGO_PKG_VERSION")))
        .build()
}
