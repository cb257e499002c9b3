use std::sync::Arc;
use std::time::Duration;

use actix_web::cookie::Cookie;
use chrono::Utc;

use crate::directory::{
    upsert_member, DirectoryClient, DirectoryConfig, MemberDirectory, SessionIssuer, UpsertPolicy,
};
use crate::error::AuthFlowError;
use crate::flow::state::{FlowFailure, FlowProgress, FlowStage};
use crate::models::{AppSession, MemberRecord, NormalizedProfile, SessionEstablishmentResult};
use crate::oauth::{
    build_authorization_url, build_http_client, issuer_pattern_for_host, normalize_profile,
    AuthorizationParams, DiscoveryClient, IdTokenPolicy, IdTokenVerifier, OAuthCallback,
    TokenExchangeClient,
};
use crate::session::{AuthTransaction, CookieFactory, SessionCascade, TransactionStore};
use crate::settings::BridgeSettings;
use crate::utils::crypto::derive_encryption_key;
use crate::utils::logging::LoggingHelper;

/// Redirect to the identity provider that starts a login
#[derive(Debug)]
pub struct LoginRedirect {
    pub correlation_id: String,
    pub authorization_url: String,
    pub transaction_cookie: Cookie<'static>,
}

/// A login attempt that reached a terminal success stage
#[derive(Debug)]
pub struct FlowOutcome {
    pub correlation_id: String,
    pub profile: NormalizedProfile,
    pub member: MemberRecord,
    pub session: SessionEstablishmentResult,
    pub destination: String,
    pub history: Vec<FlowStage>,
}

impl FlowOutcome {
    #[must_use]
    pub fn stage(&self) -> FlowStage {
        self.history.last().copied().unwrap_or(FlowStage::Idle)
    }

    /// Contents of the application session cookie for this login
    #[must_use]
    pub fn app_session(&self) -> AppSession {
        AppSession {
            email: self.profile.email.clone(),
            subject: self.profile.subject.clone(),
            member_id: Some(self.member.id.clone()),
            issued_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Drives a login from the authorization redirect to an established session
#[derive(Clone)]
pub struct AuthFlow {
    discovery_url: String,
    client_id: String,
    redirect_uri: String,
    scope: String,
    app_base_url: String,
    discovery: DiscoveryClient,
    token_client: TokenExchangeClient,
    verifier: IdTokenVerifier,
    directory: Arc<dyn MemberDirectory>,
    upsert_policy: UpsertPolicy,
    cascade: SessionCascade,
    transactions: TransactionStore,
    cookies: CookieFactory,
}

impl AuthFlow {
    /// Build the flow with the REST directory client from `settings`
    ///
    /// # Errors
    ///
    /// Returns `Internal` if an HTTP client or the issuer pattern cannot be built
    pub fn from_settings(settings: &BridgeSettings) -> Result<Self, AuthFlowError> {
        let http = build_http_client(Duration::from_secs(
            settings.directory.request_timeout_seconds,
        ))
        .map_err(|e| AuthFlowError::Internal(format!("cannot build directory client: {e}")))?;
        let directory = Arc::new(DirectoryClient::new(
            http,
            DirectoryConfig::from_settings(&settings.directory),
        ));
        Self::with_directory(settings, directory.clone(), directory)
    }

    /// Build the flow around the given directory implementations
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the HTTP client or the issuer pattern cannot be built
    pub fn with_directory(
        settings: &BridgeSettings,
        directory: Arc<dyn MemberDirectory>,
        session_issuer: Arc<dyn SessionIssuer>,
    ) -> Result<Self, AuthFlowError> {
        let idp = &settings.idp;
        let http = build_http_client(Duration::from_secs(idp.http_timeout_seconds))
            .map_err(|e| AuthFlowError::Internal(format!("cannot build IdP client: {e}")))?;

        let issuer_pattern = issuer_pattern_for_host(&idp.issuer_host)
            .map_err(|e| AuthFlowError::Internal(format!("invalid issuer host: {e}")))?;
        let policy = IdTokenPolicy {
            max_age_seconds: i64::try_from(idp.max_token_age_seconds).unwrap_or(300),
            clock_skew_seconds: i64::try_from(idp.clock_skew_seconds).unwrap_or(30),
            ..IdTokenPolicy::for_audience(&idp.client_id)
        }
        .with_issuer_pattern(issuer_pattern);

        let cookies = CookieFactory::new(
            derive_encryption_key(settings.session.cookie_secret.as_bytes()),
            settings.cookies.secure,
        );
        let transactions = TransactionStore::new(
            cookies.clone(),
            &settings.session.transaction_cookie_name,
            settings.session.transaction_ttl_seconds,
            &settings.application.allowed_return_paths,
            &settings.application.post_login_path,
        );

        Ok(Self {
            discovery_url: idp.discovery_url.clone(),
            client_id: idp.client_id.clone(),
            redirect_uri: idp.redirect_uri.clone(),
            scope: idp.scope.clone(),
            app_base_url: settings
                .application
                .app_base_url
                .trim_end_matches('/')
                .to_string(),
            discovery: DiscoveryClient::new(
                http.clone(),
                Duration::from_secs(idp.discovery_cache_seconds),
            ),
            token_client: TokenExchangeClient::new(
                http.clone(),
                idp.client_id.clone(),
                idp.client_secret.clone(),
                idp.redirect_uri.clone(),
            ),
            verifier: IdTokenVerifier::new(
                http,
                policy,
                Duration::from_secs(idp.jwks_cache_seconds),
            ),
            directory,
            upsert_policy: UpsertPolicy::from_settings(&settings.directory),
            cascade: SessionCascade::new(
                session_issuer,
                settings.directory.enable_session_token,
                settings.directory.enable_magic_link,
            ),
            transactions,
            cookies,
        })
    }

    #[must_use]
    pub fn transactions(&self) -> &TransactionStore {
        &self.transactions
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieFactory {
        &self.cookies
    }

    /// Destination URL for a sanitized return path
    #[must_use]
    pub fn destination_for(&self, return_to: &str) -> String {
        format!("{}{}", self.app_base_url, return_to)
    }

    /// Start a login: new transaction, sealed cookie, provider redirect
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryUnavailable` when the provider metadata cannot be
    /// loaded, or `Internal` if the transaction cannot be sealed
    pub async fn begin(&self, return_to: Option<&str>) -> Result<LoginRedirect, AuthFlowError> {
        let transaction = self.transactions.create(return_to);
        let correlation_id = transaction.id.to_string();
        let mut progress = FlowProgress::new(correlation_id.clone());
        LoggingHelper::log_flow_started(&correlation_id, &transaction.return_to);

        match self.authorization_redirect(&transaction, &mut progress).await {
            Ok(redirect) => Ok(redirect),
            Err(error) => Err(progress.fail(error).error),
        }
    }

    async fn authorization_redirect(
        &self,
        transaction: &AuthTransaction,
        progress: &mut FlowProgress,
    ) -> Result<LoginRedirect, AuthFlowError> {
        let document = self
            .discovery
            .fetch(&self.discovery_url, progress.correlation_id())
            .await?;
        let params = AuthorizationParams {
            client_id: &self.client_id,
            redirect_uri: &self.redirect_uri,
            scope: &self.scope,
        };
        let authorization_url =
            build_authorization_url(&document.authorization_endpoint, &params, transaction)?;
        let transaction_cookie = self.transactions.persist(transaction)?;
        progress.advance(FlowStage::Authorizing)?;

        Ok(LoginRedirect {
            correlation_id: progress.correlation_id().to_string(),
            authorization_url,
            transaction_cookie,
        })
    }

    /// Finish a login from the provider callback
    ///
    /// `transaction` must already be consumed from its cookie.
    ///
    /// # Errors
    ///
    /// Returns a [`FlowFailure`] naming the last stage reached and the error
    pub async fn complete(
        &self,
        transaction: &AuthTransaction,
        callback: &OAuthCallback,
    ) -> Result<FlowOutcome, FlowFailure> {
        let mut progress = FlowProgress::resume(transaction.id.to_string());
        match self.run(transaction, callback, &mut progress).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => Err(progress.fail(error)),
        }
    }

    async fn run(
        &self,
        transaction: &AuthTransaction,
        callback: &OAuthCallback,
        progress: &mut FlowProgress,
    ) -> Result<FlowOutcome, AuthFlowError> {
        let correlation_id = progress.correlation_id().to_string();

        if let Some(error) = callback.error.as_deref() {
            log::debug!(
                "[{}] Provider error description: {:?}",
                correlation_id,
                callback.error_description
            );
            return Err(AuthFlowError::AuthorizationDenied(error.to_string()));
        }
        let (Some(code), Some(state)) = (
            callback.code.as_deref().filter(|c| !c.is_empty()),
            callback.state.as_deref().filter(|s| !s.is_empty()),
        ) else {
            return Err(AuthFlowError::MissingCallbackParameters);
        };
        if state != transaction.state {
            return Err(AuthFlowError::StateMismatch);
        }
        progress.advance(FlowStage::CallbackReceived)?;

        let document = self
            .discovery
            .fetch(&self.discovery_url, &correlation_id)
            .await?;
        let tokens = self
            .token_client
            .exchange(
                &document.token_endpoint,
                code,
                &transaction.code_verifier,
                &correlation_id,
            )
            .await?;
        progress.advance(FlowStage::TokenExchanged)?;

        let claims = self
            .verifier
            .verify(&tokens.id_token, &document.jwks_uri, Some(&transaction.nonce))
            .await?;
        progress.advance(FlowStage::IdentityVerified)?;

        let profile = normalize_profile(&claims)?;
        progress.advance(FlowStage::ProfileResolved)?;

        let upserted = upsert_member(
            self.directory.as_ref(),
            &profile,
            &self.upsert_policy,
            &correlation_id,
        )
        .await?;
        LoggingHelper::log_member_resolved(
            &correlation_id,
            &upserted.member.id,
            upserted.action.as_str(),
        );
        progress.advance(FlowStage::MemberResolved)?;

        let destination = self.destination_for(&transaction.return_to);
        let session = self
            .cascade
            .establish(&upserted.member.id, &destination, &correlation_id)
            .await;
        progress.advance(if session.is_degraded() {
            FlowStage::SessionDegraded
        } else {
            FlowStage::SessionEstablished(session.mechanism())
        })?;

        Ok(FlowOutcome {
            correlation_id,
            profile,
            member: upserted.member,
            session,
            destination,
            history: progress.history().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionMechanism;
    use crate::testing::fixtures::{TestFixtures, TEST_STATE};
    use crate::testing::mock::{InMemoryDirectory, MockIdentityProvider, ScriptedSessionIssuer};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UNUSED_DIRECTORY: &str = "http://127.0.0.1:9";

    fn callback(code: &str, state: &str) -> OAuthCallback {
        OAuthCallback {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            ..OAuthCallback::default()
        }
    }

    fn flow_with(
        idp: &MockIdentityProvider,
        directory: Arc<InMemoryDirectory>,
        issuer: Arc<ScriptedSessionIssuer>,
    ) -> AuthFlow {
        let settings = TestFixtures::settings(&idp.uri(), UNUSED_DIRECTORY);
        AuthFlow::with_directory(&settings, directory, issuer).unwrap()
    }

    #[tokio::test]
    async fn test_begin_redirects_to_provider_with_pkce() {
        let idp = MockIdentityProvider::start().await;
        let flow = flow_with(
            &idp,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(ScriptedSessionIssuer::new(None, None)),
        );

        let redirect = flow.begin(Some("/dashboard")).await.unwrap();
        assert!(redirect
            .authorization_url
            .starts_with(&format!("{}/authorize?", idp.uri())));
        assert!(redirect.authorization_url.contains("code_challenge_method=S256"));
        assert_eq!(redirect.transaction_cookie.name(), "oidc_tmp");

        let transaction = flow
            .transactions()
            .consume(Some(redirect.transaction_cookie.value()))
            .unwrap();
        assert_eq!(transaction.return_to, "/dashboard");
        assert_eq!(transaction.id.to_string(), redirect.correlation_id);
        assert!(redirect
            .authorization_url
            .contains(&format!("state={}", transaction.state)));
    }

    #[tokio::test]
    async fn test_begin_fails_when_discovery_is_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let settings = TestFixtures::settings(&server.uri(), UNUSED_DIRECTORY);
        let flow = AuthFlow::with_directory(
            &settings,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(ScriptedSessionIssuer::new(None, None)),
        )
        .unwrap();

        assert!(matches!(
            flow.begin(None).await,
            Err(AuthFlowError::DiscoveryUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_session_established() {
        let idp = MockIdentityProvider::start().await;
        idp.issue_id_token("code-1", &TestFixtures::id_token_claims("abc"))
            .await;
        let directory = Arc::new(InMemoryDirectory::new());
        let flow = flow_with(
            &idp,
            directory.clone(),
            Arc::new(ScriptedSessionIssuer::new(Some("ms.token.1"), None)),
        );

        let transaction = TestFixtures::transaction("abc", "/dashboard");
        let outcome = flow
            .complete(&transaction, &callback("code-1", TEST_STATE))
            .await
            .unwrap();

        assert_eq!(
            outcome.stage(),
            FlowStage::SessionEstablished(SessionMechanism::Token)
        );
        assert_eq!(outcome.profile.email, "ada.lovelace@example.com");
        assert_eq!(outcome.profile.given_name, "Ada");
        assert_eq!(outcome.profile.family_name, "Lovelace");
        assert_eq!(outcome.destination, "https://app.example.com/dashboard");
        assert_eq!(outcome.correlation_id, transaction.id.to_string());
        assert_eq!(
            outcome.history,
            vec![
                FlowStage::Idle,
                FlowStage::Authorizing,
                FlowStage::CallbackReceived,
                FlowStage::TokenExchanged,
                FlowStage::IdentityVerified,
                FlowStage::ProfileResolved,
                FlowStage::MemberResolved,
                FlowStage::SessionEstablished(SessionMechanism::Token),
            ]
        );
        assert_eq!(directory.member_count(), 1);

        let session = outcome.app_session();
        assert_eq!(session.member_id.as_deref(), Some(outcome.member.id.as_str()));
        assert_eq!(session.subject, "idp-subject-123");
    }

    #[tokio::test]
    async fn test_end_to_end_degraded_session() {
        let idp = MockIdentityProvider::start().await;
        idp.issue_id_token("code-1", &TestFixtures::id_token_claims("abc"))
            .await;
        let flow = flow_with(
            &idp,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(ScriptedSessionIssuer::new(None, None)),
        );

        let outcome = flow
            .complete(
                &TestFixtures::transaction("abc", "/"),
                &callback("code-1", TEST_STATE),
            )
            .await
            .unwrap();

        assert_eq!(outcome.stage(), FlowStage::SessionDegraded);
        assert_eq!(
            outcome.session,
            SessionEstablishmentResult::RedirectOnly {
                destination: "https://app.example.com/".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_state_mismatch_fails_before_token_exchange() {
        let idp = MockIdentityProvider::start().await;
        let flow = flow_with(
            &idp,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(ScriptedSessionIssuer::new(None, None)),
        );

        let failure = flow
            .complete(
                &TestFixtures::transaction("abc", "/"),
                &callback("code-1", "forged-state"),
            )
            .await
            .unwrap_err();

        assert!(matches!(failure.error, AuthFlowError::StateMismatch));
        assert_eq!(failure.stage, FlowStage::Authorizing);
        let token_calls = idp
            .server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == "/token")
            .count();
        assert_eq!(token_calls, 0);
    }

    #[tokio::test]
    async fn test_provider_error_and_missing_parameters() {
        let idp = MockIdentityProvider::start().await;
        let flow = flow_with(
            &idp,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(ScriptedSessionIssuer::new(None, None)),
        );
        let transaction = TestFixtures::transaction("abc", "/");

        let denied = OAuthCallback {
            error: Some("access_denied".to_string()),
            error_description: Some("User cancelled".to_string()),
            ..OAuthCallback::default()
        };
        let failure = flow.complete(&transaction, &denied).await.unwrap_err();
        assert!(matches!(
            failure.error,
            AuthFlowError::AuthorizationDenied(ref e) if e == "access_denied"
        ));

        let missing = OAuthCallback {
            state: Some(TEST_STATE.to_string()),
            ..OAuthCallback::default()
        };
        let failure = flow.complete(&transaction, &missing).await.unwrap_err();
        assert!(matches!(failure.error, AuthFlowError::MissingCallbackParameters));
    }

    #[tokio::test]
    async fn test_nonce_mismatch_fails_after_token_exchange() {
        let idp = MockIdentityProvider::start().await;
        idp.issue_id_token("code-1", &TestFixtures::id_token_claims("other-nonce"))
            .await;
        let directory = Arc::new(InMemoryDirectory::new());
        let flow = flow_with(
            &idp,
            directory.clone(),
            Arc::new(ScriptedSessionIssuer::new(Some("t"), None)),
        );

        let failure = flow
            .complete(
                &TestFixtures::transaction("abc", "/"),
                &callback("code-1", TEST_STATE),
            )
            .await
            .unwrap_err();

        assert!(matches!(failure.error, AuthFlowError::NonceMismatch));
        assert_eq!(failure.stage, FlowStage::TokenExchanged);
        assert_eq!(directory.member_count(), 0);
    }

    #[tokio::test]
    async fn test_token_exchange_rejection() {
        let idp = MockIdentityProvider::start().await;
        idp.reject_code(400).await;
        let flow = flow_with(
            &idp,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(ScriptedSessionIssuer::new(None, None)),
        );

        let failure = flow
            .complete(
                &TestFixtures::transaction("abc", "/"),
                &callback("expired-code", TEST_STATE),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            AuthFlowError::TokenExchangeFailed { status: 400, .. }
        ));
        assert_eq!(failure.stage, FlowStage::CallbackReceived);
    }

    #[tokio::test]
    async fn test_directory_outage_aborts() {
        let idp = MockIdentityProvider::start().await;
        idp.issue_id_token("code-1", &TestFixtures::id_token_claims("abc"))
            .await;
        let directory = Arc::new(InMemoryDirectory::new());
        directory.fail_lookups();
        let flow = flow_with(
            &idp,
            directory,
            Arc::new(ScriptedSessionIssuer::new(Some("t"), None)),
        );

        let failure = flow
            .complete(
                &TestFixtures::transaction("abc", "/"),
                &callback("code-1", TEST_STATE),
            )
            .await
            .unwrap_err();
        assert!(matches!(failure.error, AuthFlowError::DirectoryUnavailable(_)));
        assert_eq!(failure.stage, FlowStage::ProfileResolved);
    }

    #[tokio::test]
    async fn test_two_logins_share_one_member_over_rest_directory() {
        let idp = MockIdentityProvider::start().await;
        idp.issue_id_token("code-1", &TestFixtures::id_token_claims("abc"))
            .await;

        let directory = MockServer::start().await;
        // First lookup misses, later lookups find the created member
        Mock::given(method("GET"))
            .and(path("/members/ada.lovelace%40example.com"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&directory)
            .await;
        Mock::given(method("GET"))
            .and(path("/members/ada.lovelace%40example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "id": "mem_1",
                    "auth": {"email": "ada.lovelace@example.com"},
                    "customFields": {"first-name": "Ada", "last-name": "Lovelace"}
                }
            })))
            .mount(&directory)
            .await;
        Mock::given(method("POST"))
            .and(path("/members"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {"id": "mem_1", "auth": {"email": "ada.lovelace@example.com"}}
            })))
            .expect(1)
            .mount(&directory)
            .await;
        Mock::given(method("POST"))
            .and(path("/members/mem_1/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "ms_tok"}})),
            )
            .mount(&directory)
            .await;

        let settings = TestFixtures::settings(&idp.uri(), &directory.uri());
        let flow = AuthFlow::from_settings(&settings).unwrap();

        let first = flow
            .complete(
                &TestFixtures::transaction("abc", "/"),
                &callback("code-1", TEST_STATE),
            )
            .await
            .unwrap();
        let second = flow
            .complete(
                &TestFixtures::transaction("abc", "/"),
                &callback("code-1", TEST_STATE),
            )
            .await
            .unwrap();

        assert_eq!(first.member.id, "mem_1");
        assert_eq!(second.member.id, "mem_1");
        assert_eq!(
            second.session,
            SessionEstablishmentResult::Token {
                token: "ms_tok".to_string(),
                destination: "https://app.example.com/".to_string(),
            }
        );
    }
}
