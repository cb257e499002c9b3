use actix_web::{cookie::Cookie, HttpRequest};
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};

use crate::models::AppSession;
use crate::utils::crypto::{decrypt_data, encrypt_data};

/// Options for cookie creation
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: actix_web::cookie::SameSite,
    pub path: String,
    pub max_age: actix_web::cookie::time::Duration,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            same_site: actix_web::cookie::SameSite::Lax,
            path: "/".to_string(),
            max_age: actix_web::cookie::time::Duration::hours(24),
        }
    }
}

/// Cookie factory for sealed (AES-256-GCM) cookies
///
/// The login transaction and the application session both travel in cookies
/// built here; the values are encrypted and authenticated, so any tampering
/// makes them unreadable rather than silently altered.
#[derive(Clone)]
pub struct CookieFactory {
    encryption_key: [u8; 32],
    cookie_secure: bool,
}

impl CookieFactory {
    #[must_use]
    pub fn new(encryption_key: [u8; 32], cookie_secure: bool) -> Self {
        Self {
            encryption_key,
            cookie_secure,
        }
    }

    /// Generic method to create a cookie with encrypted data
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_cookie<T: Serialize>(
        &self,
        name: &str,
        data: Option<&T>,
        options: CookieOptions,
    ) -> Result<Cookie<'static>> {
        let value = match data {
            Some(data) => encrypt_data(data, &self.encryption_key)?,
            None => String::new(),
        };

        Ok(Cookie::build(name.to_owned(), value)
            .http_only(options.http_only)
            .secure(self.cookie_secure && options.secure)
            .same_site(options.same_site)
            .path(options.path)
            .max_age(options.max_age)
            .finish())
    }

    /// Short-lived cookie carrying an in-flight login transaction
    ///
    /// `SameSite=Lax` so it is sent on the top-level redirect back from the
    /// identity provider.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_transaction_cookie<T: Serialize>(
        &self,
        name: &str,
        transaction: &T,
        ttl_seconds: i64,
    ) -> Result<Cookie<'static>> {
        let cookie = self.create_cookie(
            name,
            Some(transaction),
            CookieOptions {
                max_age: actix_web::cookie::time::Duration::seconds(ttl_seconds),
                ..Default::default()
            },
        )?;

        log::debug!(
            "Creating login transaction cookie: secure={}, name={}, encrypted_len={}",
            self.cookie_secure,
            name,
            cookie.value().len()
        );

        Ok(cookie)
    }

    /// Application session cookie set after a successful callback
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_app_session_cookie(
        &self,
        name: &str,
        session: &AppSession,
        duration_days: u64,
    ) -> Result<Cookie<'static>> {
        self.create_cookie(
            name,
            Some(session),
            CookieOptions {
                max_age: actix_web::cookie::time::Duration::days(
                    i64::try_from(duration_days).unwrap_or(7),
                ),
                ..Default::default()
            },
        )
    }

    /// Create an expired cookie that makes the browser drop `name`
    #[must_use]
    pub fn create_expired_cookie(&self, name: &str) -> Cookie<'static> {
        create_expired_cookie(name, self.cookie_secure)
    }

    /// Open a sealed cookie value
    ///
    /// # Errors
    ///
    /// Returns an error if the value was not sealed with this factory's key,
    /// was modified, or does not deserialize into `T`
    pub fn open<T: DeserializeOwned>(&self, value: &str) -> Result<T> {
        decrypt_data(value, &self.encryption_key)
    }

    /// Read the application session from the request
    ///
    /// Returns `Ok(None)` when the cookie is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie is present but cannot be opened
    pub fn get_app_session(&self, req: &HttpRequest, name: &str) -> Result<Option<AppSession>> {
        match req.cookie(name) {
            Some(cookie) if !cookie.value().is_empty() => self.open(cookie.value()).map(Some),
            _ => Ok(None),
        }
    }
}

/// Create an expired cookie to clear a specific cookie
#[must_use]
pub fn create_expired_cookie(name: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(name.to_owned(), "")
        .http_only(true)
        .secure(secure)
        .same_site(actix_web::cookie::SameSite::Lax)
        .path("/")
        .max_age(actix_web::cookie::time::Duration::seconds(-1))
        .finish()
}
