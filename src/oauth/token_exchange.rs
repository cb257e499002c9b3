// Authorization code -> token set exchange

use log::debug;
use serde::Deserialize;

use crate::error::AuthFlowError;
use crate::utils::logging::LoggingHelper;

/// Longest slice of a provider error body kept for diagnostics
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
}

/// Tokens returned by the provider; `id_token` is guaranteed present
#[derive(Clone)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("id_token", &"<redacted>")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Confidential-client token endpoint caller
#[derive(Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl TokenExchangeClient {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    /// Trade an authorization code (plus its PKCE verifier) for tokens
    ///
    /// # Errors
    ///
    /// Returns `TokenExchangeFailed` for transport errors and timeouts
    /// (status 0), non-success responses, and responses without an `id_token`
    pub async fn exchange(
        &self,
        token_endpoint: &str,
        code: &str,
        code_verifier: &str,
        correlation_id: &str,
    ) -> Result<TokenSet, AuthFlowError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if !self.client_secret.is_empty() {
            form.push(("client_secret", self.client_secret.as_str()));
        }

        let response = self
            .http
            .post(token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "timed out".to_string()
                } else {
                    e.to_string()
                };
                LoggingHelper::log_external_call_failed(
                    correlation_id,
                    token_endpoint,
                    None,
                    &reason,
                );
                AuthFlowError::TokenExchangeFailed {
                    status: 0,
                    body: e.to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = truncate_chars(&body, MAX_ERROR_BODY_CHARS);
            LoggingHelper::log_external_call_failed(
                correlation_id,
                token_endpoint,
                Some(status.as_u16()),
                "token request rejected",
            );
            debug!("[{correlation_id}] Token endpoint error body: {body}");
            return Err(AuthFlowError::TokenExchangeFailed {
                status: status.as_u16(),
                body,
            });
        }

        let tokens: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| AuthFlowError::TokenExchangeFailed {
                    status: status.as_u16(),
                    body: format!("unreadable token response: {e}"),
                })?;

        let id_token = tokens
            .id_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthFlowError::TokenExchangeFailed {
                status: status.as_u16(),
                body: "token response has no id_token".to_string(),
            })?;

        Ok(TokenSet {
            id_token,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: tokens.token_type,
            expires_in: tokens.expires_in,
        })
    }
}

fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}
