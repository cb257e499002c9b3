// OIDC discovery document retrieval with a short-lived per-URL cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AuthFlowError;
use crate::utils::logging::LoggingHelper;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OidcDiscoveryDocument {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

struct CachedDocument {
    document: OidcDiscoveryDocument,
    fetched_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DiscoveryClient {
    http: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, CachedDocument>>>,
    cache_duration: Duration,
}

impl DiscoveryClient {
    #[must_use]
    pub fn new(http: reqwest::Client, cache_duration: Duration) -> Self {
        Self {
            http,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_duration,
        }
    }

    /// Return the provider metadata, served from cache while it is fresh
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryUnavailable` on transport failure, timeout, a
    /// non-success status, or a document lacking the required endpoints
    pub async fn fetch(
        &self,
        discovery_url: &str,
        correlation_id: &str,
    ) -> Result<OidcDiscoveryDocument, AuthFlowError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(discovery_url) {
                let age = Utc::now().signed_duration_since(cached.fetched_at);
                if age.to_std().unwrap_or(Duration::MAX) < self.cache_duration {
                    debug!("📄 Using cached discovery document for {discovery_url}");
                    return Ok(cached.document.clone());
                }
            }
        }

        let document = self
            .fetch_uncached(discovery_url)
            .await
            .map_err(|(status, e)| {
                LoggingHelper::log_external_call_failed(
                    correlation_id,
                    discovery_url,
                    status,
                    &e.to_string(),
                );
                e
            })?;

        let mut cache = self.cache.write().await;
        cache.insert(
            discovery_url.to_string(),
            CachedDocument {
                document: document.clone(),
                fetched_at: Utc::now(),
            },
        );

        Ok(document)
    }

    async fn fetch_uncached(
        &self,
        discovery_url: &str,
    ) -> Result<OidcDiscoveryDocument, (Option<u16>, AuthFlowError)> {
        debug!("📄 Fetching OIDC discovery document from {discovery_url}");

        let response = self
            .http
            .get(discovery_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                (
                    None,
                    AuthFlowError::DiscoveryUnavailable(format!("request failed: {e}")),
                )
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err((
                Some(status),
                AuthFlowError::DiscoveryUnavailable(format!("status {status}")),
            ));
        }

        let document: OidcDiscoveryDocument = response.json().await.map_err(|e| {
            (
                Some(status),
                AuthFlowError::DiscoveryUnavailable(format!("malformed document: {e}")),
            )
        })?;

        for (name, value) in [
            ("authorization_endpoint", &document.authorization_endpoint),
            ("token_endpoint", &document.token_endpoint),
            ("jwks_uri", &document.jwks_uri),
        ] {
            if url::Url::parse(value).is_err() {
                return Err((
                    Some(status),
                    AuthFlowError::DiscoveryUnavailable(format!("{name} is not an absolute URL")),
                ));
            }
        }

        debug!(
            "✅ Discovery document fetched, JWKS URI: {}",
            document.jwks_uri
        );
        Ok(document)
    }
}
