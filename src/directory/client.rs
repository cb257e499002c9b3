use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{Map, Value};

use crate::directory::candidates::{is_usable_link, is_usable_token, TemplateVars};
use crate::directory::{
    DirectoryError, EndpointCandidate, MemberDirectory, MemberUpdate, NewMember, SessionIssuer,
};
use crate::models::MemberRecord;
use crate::settings::DirectorySettings;
use crate::utils::logging::LoggingHelper;

const SESSION_TOKEN: &str = "session token";
const MAGIC_LINK: &str = "magic link";

/// Connection details for the directory's admin API
#[derive(Clone)]
pub struct DirectoryConfig {
    pub api_base: String,
    pub api_key: String,
    pub api_key_header: String,
    pub request_timeout: Duration,
    pub session_token_candidates: Vec<EndpointCandidate>,
    pub magic_link_candidates: Vec<EndpointCandidate>,
}

impl DirectoryConfig {
    #[must_use]
    pub fn from_settings(settings: &DirectorySettings) -> Self {
        Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.secret_key.clone(),
            api_key_header: settings.api_key_header.clone(),
            request_timeout: Duration::from_secs(settings.request_timeout_seconds),
            session_token_candidates: settings.session_token_candidates.clone(),
            magic_link_candidates: settings.magic_link_candidates.clone(),
        }
    }
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("api_base", &self.api_base)
            .field("api_key_header", &self.api_key_header)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// REST client for the membership directory
#[derive(Clone, Debug)]
pub struct DirectoryClient {
    http: reqwest::Client,
    config: DirectoryConfig,
}

impl DirectoryClient {
    #[must_use]
    pub fn new(http: reqwest::Client, config: DirectoryConfig) -> Self {
        if config.api_key.is_empty() {
            log::warn!("Directory API key is not set; directory calls will be rejected");
        }
        Self { http, config }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.config.api_base, path))
            .header(self.config.api_key_header.as_str(), self.config.api_key.as_str())
            .timeout(self.config.request_timeout)
    }

    async fn send(
        request: RequestBuilder,
        endpoint: &str,
        correlation_id: &str,
    ) -> Result<reqwest::Response, DirectoryError> {
        request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "timed out".to_string()
            } else {
                e.to_string()
            };
            LoggingHelper::log_external_call_failed(correlation_id, endpoint, None, &reason);
            DirectoryError::Unavailable(format!("{endpoint}: {reason}"))
        })
    }

    async fn read_member(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<MemberRecord, DirectoryError> {
        let body: Value = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(format!("{endpoint}: {e}")))?;
        parse_member(&body)
    }

    fn unexpected_status(
        endpoint: &str,
        status: StatusCode,
        correlation_id: &str,
    ) -> DirectoryError {
        LoggingHelper::log_external_call_failed(
            correlation_id,
            endpoint,
            Some(status.as_u16()),
            "unexpected status",
        );
        DirectoryError::Unavailable(format!("{endpoint} returned {}", status.as_u16()))
    }

    /// Try each candidate in order and return the first accepted artifact
    async fn try_candidates(
        &self,
        kind: &str,
        candidates: &[EndpointCandidate],
        vars: TemplateVars<'_>,
        accept: fn(&str) -> bool,
        correlation_id: &str,
    ) -> Option<String> {
        for candidate in candidates {
            let path = candidate.render_path(&vars);
            let timeout = candidate
                .timeout_seconds
                .map_or(self.config.request_timeout, Duration::from_secs);

            let mut request = self
                .request(candidate.method.as_reqwest(), &path)
                .timeout(timeout);
            if let Some(body) = candidate.render_body(&vars) {
                request = request.json(&body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let reason = if e.is_timeout() {
                        "timed out"
                    } else {
                        "request error"
                    };
                    LoggingHelper::log_candidate_failed(correlation_id, kind, &path, None, reason);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                LoggingHelper::log_candidate_failed(
                    correlation_id,
                    kind,
                    &path,
                    Some(status.as_u16()),
                    "unsuccessful response",
                );
                continue;
            }

            let Ok(body) = response.json::<Value>().await else {
                LoggingHelper::log_candidate_failed(
                    correlation_id,
                    kind,
                    &path,
                    Some(status.as_u16()),
                    "response is not JSON",
                );
                continue;
            };

            match candidate.extract(&body) {
                Some(artifact) if accept(artifact) => {
                    LoggingHelper::log_candidate_succeeded(correlation_id, kind, &path);
                    return Some(artifact.to_string());
                }
                Some(_) => LoggingHelper::log_candidate_failed(
                    correlation_id,
                    kind,
                    &path,
                    Some(status.as_u16()),
                    "artifact rejected",
                ),
                None => LoggingHelper::log_candidate_failed(
                    correlation_id,
                    kind,
                    &path,
                    Some(status.as_u16()),
                    "no recognizable field",
                ),
            }
        }
        None
    }
}

/// Member record from a directory response, unwrapping a `data` envelope
///
/// # Errors
///
/// Returns `InvalidResponse` when the record has no id
pub fn parse_member(body: &Value) -> Result<MemberRecord, DirectoryError> {
    let record = body.get("data").filter(|data| data.is_object()).unwrap_or(body);

    let id = record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DirectoryError::InvalidResponse("member record without id".to_string()))?;

    let email = record
        .get("auth")
        .and_then(|auth| auth.get("email"))
        .or_else(|| record.get("email"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let custom_fields = record
        .get("customFields")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);

    Ok(MemberRecord {
        id: id.to_string(),
        email: email.to_lowercase(),
        custom_fields,
    })
}

fn is_duplicate_email(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || (matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY)
            && body.to_lowercase().contains("already"))
}

#[async_trait]
impl MemberDirectory for DirectoryClient {
    async fn find_by_email(
        &self,
        email: &str,
        correlation_id: &str,
    ) -> Result<Option<MemberRecord>, DirectoryError> {
        let endpoint = "GET /members/{email}";
        let path = format!("/members/{}", urlencoding::encode(email));
        let response =
            Self::send(self.request(Method::GET, &path), endpoint, correlation_id).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                Self::read_member(response, endpoint).await.map(Some)
            }
            status => Err(Self::unexpected_status(endpoint, status, correlation_id)),
        }
    }

    async fn create(
        &self,
        member: &NewMember,
        correlation_id: &str,
    ) -> Result<MemberRecord, DirectoryError> {
        let endpoint = "POST /members";
        let request = self.request(Method::POST, "/members").json(member);
        let response = Self::send(request, endpoint, correlation_id).await?;

        let status = response.status();
        if status.is_success() {
            return Self::read_member(response, endpoint).await;
        }

        let body = response.text().await.unwrap_or_default();
        if is_duplicate_email(status, &body) {
            return Err(DirectoryError::Conflict);
        }
        Err(Self::unexpected_status(endpoint, status, correlation_id))
    }

    async fn update(
        &self,
        member_id: &str,
        update: &MemberUpdate,
        correlation_id: &str,
    ) -> Result<MemberRecord, DirectoryError> {
        let endpoint = "PATCH /members/{id}";
        let path = format!("/members/{}", urlencoding::encode(member_id));
        let request = self.request(Method::PATCH, &path).json(update);
        let response = Self::send(request, endpoint, correlation_id).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound),
            status if status.is_success() => Self::read_member(response, endpoint).await,
            status => Err(Self::unexpected_status(endpoint, status, correlation_id)),
        }
    }
}

#[async_trait]
impl SessionIssuer for DirectoryClient {
    async fn issue_session_token(&self, member_id: &str, correlation_id: &str) -> Option<String> {
        let vars = TemplateVars {
            member_id,
            redirect_url: "",
        };
        self.try_candidates(
            SESSION_TOKEN,
            &self.config.session_token_candidates,
            vars,
            is_usable_token,
            correlation_id,
        )
        .await
    }

    async fn issue_magic_link(
        &self,
        member_id: &str,
        destination: &str,
        correlation_id: &str,
    ) -> Option<String> {
        let vars = TemplateVars {
            member_id,
            redirect_url: destination,
        };
        self.try_candidates(
            MAGIC_LINK,
            &self.config.magic_link_candidates,
            vars,
            is_usable_link,
            correlation_id,
        )
        .await
    }
}
