use std::sync::Arc;

use crate::directory::SessionIssuer;
use crate::models::SessionEstablishmentResult;
use crate::utils::logging::LoggingHelper;

/// Turns a resolved member into a browser session, best mechanism first
///
/// Token issuance, then a magic link, then a bare redirect. The cascade never
/// fails: the last step is always available.
#[derive(Clone)]
pub struct SessionCascade {
    issuer: Arc<dyn SessionIssuer>,
    enable_session_token: bool,
    enable_magic_link: bool,
}

impl SessionCascade {
    #[must_use]
    pub fn new(
        issuer: Arc<dyn SessionIssuer>,
        enable_session_token: bool,
        enable_magic_link: bool,
    ) -> Self {
        Self {
            issuer,
            enable_session_token,
            enable_magic_link,
        }
    }

    pub async fn establish(
        &self,
        member_id: &str,
        destination: &str,
        correlation_id: &str,
    ) -> SessionEstablishmentResult {
        let result = self.run(member_id, destination, correlation_id).await;
        LoggingHelper::log_cascade_outcome(
            correlation_id,
            result.mechanism().as_str(),
            result.degradation().as_ref(),
        );
        result
    }

    async fn run(
        &self,
        member_id: &str,
        destination: &str,
        correlation_id: &str,
    ) -> SessionEstablishmentResult {
        if self.enable_session_token {
            if let Some(token) = self
                .issuer
                .issue_session_token(member_id, correlation_id)
                .await
            {
                return SessionEstablishmentResult::Token {
                    token,
                    destination: destination.to_string(),
                };
            }
        }

        if self.enable_magic_link {
            if let Some(url) = self
                .issuer
                .issue_magic_link(member_id, destination, correlation_id)
                .await
            {
                return SessionEstablishmentResult::MagicLink { url };
            }
        }

        SessionEstablishmentResult::RedirectOnly {
            destination: destination.to_string(),
        }
    }
}
