//! Login transaction state
//!
//! A transaction is created when a login starts, sealed into a short-lived
//! cookie, and consumed exactly once when the identity provider redirects
//! back. Nothing about an in-flight login is kept server-side except the ids
//! of transactions that were already consumed, so a captured cookie cannot be
//! replayed within its lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use actix_web::cookie::Cookie;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthFlowError;
use crate::session::cookie::CookieFactory;
use crate::utils::crypto::{generate_code_verifier, generate_state_token, pkce_challenge};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTransaction {
    /// Correlation id for every log line of this login attempt
    pub id: Uuid,
    pub state: String,
    pub nonce: String,
    #[serde(rename = "codeVerifier")]
    pub code_verifier: String,
    #[serde(rename = "returnTo")]
    pub return_to: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl AuthTransaction {
    /// Fresh transaction with new state, nonce and PKCE verifier
    ///
    /// `return_to` is taken as-is; use [`TransactionStore::create`] for
    /// allowlist checking.
    #[must_use]
    pub fn generate(return_to: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: generate_state_token(),
            nonce: generate_state_token(),
            code_verifier: generate_code_verifier(),
            return_to: return_to.to_string(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn code_challenge(&self) -> String {
        pkce_challenge(&self.code_verifier)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now.signed_duration_since(self.created_at) > ttl
    }
}

impl std::fmt::Debug for AuthTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTransaction")
            .field("id", &self.id)
            .field("return_to", &self.return_to)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Creates, seals and consumes login transactions
#[derive(Clone)]
pub struct TransactionStore {
    cookies: CookieFactory,
    cookie_name: String,
    ttl: TimeDelta,
    allowed_return_paths: HashSet<String>,
    default_return_path: String,
    // transaction id -> instant after which the id can be forgotten
    consumed: Arc<Mutex<HashMap<Uuid, DateTime<Utc>>>>,
}

impl TransactionStore {
    #[must_use]
    pub fn new(
        cookies: CookieFactory,
        cookie_name: &str,
        ttl_seconds: u64,
        allowed_return_paths: &[String],
        default_return_path: &str,
    ) -> Self {
        Self {
            cookies,
            cookie_name: cookie_name.to_string(),
            ttl: TimeDelta::seconds(i64::try_from(ttl_seconds).unwrap_or(300)),
            allowed_return_paths: allowed_return_paths.iter().cloned().collect(),
            default_return_path: default_return_path.to_string(),
            consumed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Start a new transaction; `return_to` outside the allowlist falls back
    /// to the default post-login path
    #[must_use]
    pub fn create(&self, return_to: Option<&str>) -> AuthTransaction {
        AuthTransaction::generate(&self.sanitize_return_to(return_to))
    }

    #[must_use]
    pub fn sanitize_return_to(&self, return_to: Option<&str>) -> String {
        match return_to {
            Some(path) if self.allowed_return_paths.contains(path) => path.to_string(),
            _ => self.default_return_path.clone(),
        }
    }

    /// Seal the transaction into its cookie
    ///
    /// # Errors
    ///
    /// Returns `Internal` if encryption fails
    pub fn persist(&self, transaction: &AuthTransaction) -> Result<Cookie<'static>, AuthFlowError> {
        self.cookies
            .create_transaction_cookie(&self.cookie_name, transaction, self.ttl.num_seconds())
            .map_err(|e| AuthFlowError::Internal(format!("cannot seal transaction: {e}")))
    }

    /// Open and consume a sealed transaction
    ///
    /// # Errors
    ///
    /// Returns `TransactionExpiredOrInvalid` when the value is absent, cannot
    /// be opened, is older than the TTL, or was already consumed
    pub fn consume(&self, sealed: Option<&str>) -> Result<AuthTransaction, AuthFlowError> {
        self.consume_at(sealed, Utc::now())
    }

    fn consume_at(
        &self,
        sealed: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthTransaction, AuthFlowError> {
        let sealed = sealed
            .filter(|value| !value.is_empty())
            .ok_or(AuthFlowError::TransactionExpiredOrInvalid)?;

        let transaction: AuthTransaction = self.cookies.open(sealed).map_err(|e| {
            log::debug!("Login transaction cookie rejected: {e}");
            AuthFlowError::TransactionExpiredOrInvalid
        })?;

        let mut consumed = self
            .consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        consumed.retain(|_, forget_after| *forget_after > now);

        if transaction.is_expired_at(now, self.ttl) {
            log::info!("[{}] Login transaction expired", transaction.id);
            return Err(AuthFlowError::TransactionExpiredOrInvalid);
        }

        if consumed.contains_key(&transaction.id) {
            log::warn!("[{}] Replayed login transaction rejected", transaction.id);
            return Err(AuthFlowError::TransactionExpiredOrInvalid);
        }
        consumed.insert(transaction.id, transaction.created_at + self.ttl);

        Ok(transaction)
    }

    /// Cookie that removes the transaction from the browser
    #[must_use]
    pub fn clear_cookie(&self) -> Cookie<'static> {
        self.cookies.create_expired_cookie(&self.cookie_name)
    }

    #[cfg(test)]
    fn consumed_len(&self) -> usize {
        self.consumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
