//! Login flow error taxonomy
//!
//! Every hard failure of the login flow is one of these variants. The
//! `Display` text is for logs; end users only ever see the stable `code()`
//! on a generic error page.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::utils::responses::ResponseBuilder;

#[derive(Debug, Error)]
pub enum AuthFlowError {
    #[error("login transaction is missing, expired, tampered or already used")]
    TransactionExpiredOrInvalid,

    #[error("callback state does not match the login transaction")]
    StateMismatch,

    #[error("callback is missing the code or state parameter")]
    MissingCallbackParameters,

    #[error("identity provider returned an authorization error: {0}")]
    AuthorizationDenied(String),

    #[error("discovery document unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("token exchange failed with status {status}")]
    TokenExchangeFailed { status: u16, body: String },

    #[error("ID token signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("unexpected ID token issuer: {0}")]
    UnexpectedIssuer(String),

    #[error("ID token audience mismatch: {0}")]
    AudienceMismatch(String),

    #[error("ID token is not fresh: {0}")]
    TokenTooOld(String),

    #[error("ID token nonce does not match the login transaction")]
    NonceMismatch,

    #[error("no usable email claim in the ID token")]
    MissingEmail,

    #[error("member directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Never fatal: the flow degrades to a bare redirect
    #[error("no directory session could be established")]
    SessionUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthFlowError {
    /// Stable, non-sensitive identifier shown to end users
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransactionExpiredOrInvalid => "transaction_expired_or_invalid",
            Self::StateMismatch => "state_mismatch",
            Self::MissingCallbackParameters => "missing_callback_parameters",
            Self::AuthorizationDenied(_) => "authorization_denied",
            Self::DiscoveryUnavailable(_) => "discovery_unavailable",
            Self::TokenExchangeFailed { .. } => "token_exchange_failed",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::UnexpectedIssuer(_) => "unexpected_issuer",
            Self::AudienceMismatch(_) => "audience_mismatch",
            Self::TokenTooOld(_) => "token_too_old",
            Self::NonceMismatch => "nonce_mismatch",
            Self::MissingEmail => "missing_email",
            Self::DirectoryUnavailable(_) => "directory_unavailable",
            Self::SessionUnavailable => "session_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// User-facing summary; never includes provider responses
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::TransactionExpiredOrInvalid => {
                "Your sign-in attempt expired. Please start again."
            }
            Self::StateMismatch | Self::MissingCallbackParameters => {
                "The sign-in response could not be matched to your request. Please start again."
            }
            Self::AuthorizationDenied(_) => "Sign-in was cancelled or denied.",
            Self::DiscoveryUnavailable(_)
            | Self::TokenExchangeFailed { .. }
            | Self::DirectoryUnavailable(_) => {
                "A service needed for sign-in is temporarily unavailable. Please try again shortly."
            }
            Self::SignatureInvalid(_)
            | Self::UnexpectedIssuer(_)
            | Self::AudienceMismatch(_)
            | Self::TokenTooOld(_)
            | Self::NonceMismatch => "Your identity could not be verified.",
            Self::MissingEmail => "Your account does not expose an email address.",
            Self::SessionUnavailable | Self::Internal(_) => "Sign-in failed unexpectedly.",
        }
    }
}

impl ResponseError for AuthFlowError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TransactionExpiredOrInvalid
            | Self::StateMismatch
            | Self::MissingCallbackParameters
            | Self::AuthorizationDenied(_)
            | Self::MissingEmail => StatusCode::BAD_REQUEST,
            Self::SignatureInvalid(_)
            | Self::UnexpectedIssuer(_)
            | Self::AudienceMismatch(_)
            | Self::TokenTooOld(_)
            | Self::NonceMismatch => StatusCode::UNAUTHORIZED,
            Self::DiscoveryUnavailable(_)
            | Self::TokenExchangeFailed { .. }
            | Self::DirectoryUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::SessionUnavailable | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        ResponseBuilder::error_page(self.status_code(), self.code(), self.public_message())
    }
}
