// ID token verification with JWKS caching
// Signature, audience, freshness, multi-tenant issuer shape and nonce

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use p256::{
    ecdsa::{Signature as EcdsaSignature, VerifyingKey as EcdsaVerifyingKey},
    EncodedPoint,
};
use rsa::{pkcs1v15::VerifyingKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::AuthFlowError;
use crate::models::IdentityClaims;

/// Issuer host of the public multi-tenant cloud
pub const DEFAULT_ISSUER_HOST: &str = "login.microsoftonline.com";

/// `https://login.microsoftonline.com/<tenant>/v2.0`
pub static DEFAULT_ISSUER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    issuer_pattern_for_host(DEFAULT_ISSUER_HOST).expect("default issuer pattern is valid")
});

/// Build the accepted issuer pattern `^https://<host>/<hex tenant id>/v2.0$`
///
/// # Errors
///
/// Returns an error if the resulting expression cannot be compiled
pub fn issuer_pattern_for_host(host: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"^https://{}/[0-9a-fA-F-]+/v2\.0$",
        regex::escape(host)
    ))
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
pub enum IdTokenError {
    Malformed(String),
    UnsupportedAlgorithm(String),
    KeyNotFound(String),
    JwksFetchFailed(String),
    KeyDecodingFailed(String),
    SignatureInvalid,
    AudienceMismatch { expected: String, actual: Vec<String> },
    MissingClaim(&'static str),
    TokenExpired,
    TokenNotYetValid,
    IssuedInFuture,
    TokenTooOld { age_seconds: i64 },
    UnexpectedIssuer(String),
    NonceMismatch,
}

impl std::fmt::Display for IdTokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed token: {msg}"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "Unsupported algorithm: {alg}"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {kid}"),
            Self::JwksFetchFailed(msg) => write!(f, "Failed to fetch JWKS: {msg}"),
            Self::KeyDecodingFailed(msg) => write!(f, "Failed to decode key: {msg}"),
            Self::SignatureInvalid => write!(f, "JWT signature verification failed"),
            Self::AudienceMismatch { expected, actual } => {
                write!(f, "Audience {actual:?} does not include '{expected}'")
            }
            Self::MissingClaim(claim) => write!(f, "Missing required claim '{claim}'"),
            Self::TokenExpired => write!(f, "Token has expired"),
            Self::TokenNotYetValid => write!(f, "Token is not yet valid"),
            Self::IssuedInFuture => write!(f, "Token issued in the future"),
            Self::TokenTooOld { age_seconds } => {
                write!(f, "Token issued {age_seconds}s ago exceeds the maximum age")
            }
            Self::UnexpectedIssuer(iss) => write!(f, "Unexpected issuer: {iss}"),
            Self::NonceMismatch => write!(f, "Nonce does not match"),
        }
    }
}

impl std::error::Error for IdTokenError {}

impl From<IdTokenError> for AuthFlowError {
    fn from(error: IdTokenError) -> Self {
        let detail = error.to_string();
        match error {
            IdTokenError::Malformed(_)
            | IdTokenError::UnsupportedAlgorithm(_)
            | IdTokenError::KeyNotFound(_)
            | IdTokenError::JwksFetchFailed(_)
            | IdTokenError::KeyDecodingFailed(_)
            | IdTokenError::SignatureInvalid
            | IdTokenError::MissingClaim("sub") => Self::SignatureInvalid(detail),
            IdTokenError::AudienceMismatch { .. } | IdTokenError::MissingClaim("aud") => {
                Self::AudienceMismatch(detail)
            }
            IdTokenError::UnexpectedIssuer(_) | IdTokenError::MissingClaim("iss") => {
                Self::UnexpectedIssuer(detail)
            }
            IdTokenError::NonceMismatch => Self::NonceMismatch,
            IdTokenError::MissingClaim(_)
            | IdTokenError::TokenExpired
            | IdTokenError::TokenNotYetValid
            | IdTokenError::IssuedInFuture
            | IdTokenError::TokenTooOld { .. } => Self::TokenTooOld(detail),
        }
    }
}

// ============================================================================
// JWT Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: Option<String>,
    pub kid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    iss: Option<String>,
    sub: Option<String>,
    aud: Option<Value>, // string or array
    exp: Option<i64>,
    nbf: Option<i64>,
    iat: Option<i64>,
    nonce: Option<String>,
    email: Option<String>,
    preferred_username: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    name: Option<String>,
}

// ============================================================================
// JWKS Structures
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,

    // RSA keys
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,

    // EC keys
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

// ============================================================================
// JWKS Cache
// ============================================================================

pub struct JwksCache {
    // JWKS URI -> keys
    keys: HashMap<String, Vec<JsonWebKey>>,
    last_updated: HashMap<String, DateTime<Utc>>,
    failed_fetches: HashMap<String, DateTime<Utc>>,
    cache_duration: Duration,
    retry_backoff: Duration,
}

impl JwksCache {
    #[must_use]
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            keys: HashMap::new(),
            last_updated: HashMap::new(),
            failed_fetches: HashMap::new(),
            cache_duration,
            retry_backoff: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn is_cache_valid(&self, jwks_uri: &str) -> bool {
        self.last_updated.get(jwks_uri).is_some_and(|last_updated| {
            let elapsed = Utc::now().signed_duration_since(*last_updated);
            elapsed.to_std().unwrap_or(Duration::MAX) < self.cache_duration
        })
    }

    #[must_use]
    pub fn should_retry_fetch(&self, jwks_uri: &str) -> bool {
        self.failed_fetches.get(jwks_uri).map_or(true, |last_failed| {
            let elapsed = Utc::now().signed_duration_since(*last_failed);
            elapsed.to_std().unwrap_or(Duration::MAX) >= self.retry_backoff
        })
    }

    /// Find the signing key for a token
    ///
    /// Without a `kid`, a key is only chosen when exactly one key of the
    /// required type is published.
    #[must_use]
    pub fn find_key(&self, jwks_uri: &str, kid: Option<&str>, kty: &str) -> Option<&JsonWebKey> {
        let keys = self.keys.get(jwks_uri)?;
        if let Some(kid) = kid {
            return keys.iter().find(|key| key.kid.as_deref() == Some(kid));
        }

        let mut candidates = keys.iter().filter(|key| key.kty == kty);
        match (candidates.next(), candidates.next()) {
            (Some(key), None) => Some(key),
            _ => None,
        }
    }

    pub fn store_keys(&mut self, jwks_uri: &str, keys: Vec<JsonWebKey>) {
        let signing_keys: Vec<JsonWebKey> = keys
            .into_iter()
            .filter(|key| key.key_use.as_deref().map_or(true, |usage| usage == "sig"))
            .collect();

        debug!(
            "💾 Cached {} signing keys from {jwks_uri}",
            signing_keys.len()
        );
        self.keys.insert(jwks_uri.to_string(), signing_keys);
        self.last_updated.insert(jwks_uri.to_string(), Utc::now());
        self.failed_fetches.remove(jwks_uri);
    }

    pub fn record_fetch_failure(&mut self, jwks_uri: &str) {
        self.failed_fetches.insert(jwks_uri.to_string(), Utc::now());
    }
}

// ============================================================================
// Verification policy
// ============================================================================

/// What a verified ID token must satisfy beyond its signature
#[derive(Debug, Clone)]
pub struct IdTokenPolicy {
    pub audience: String,
    pub issuer_pattern: Regex,
    pub max_age_seconds: i64,
    pub clock_skew_seconds: i64,
}

impl IdTokenPolicy {
    /// Policy for the public multi-tenant cloud: 5 minute maximum age, 30s skew
    #[must_use]
    pub fn for_audience(audience: &str) -> Self {
        Self {
            audience: audience.to_string(),
            issuer_pattern: DEFAULT_ISSUER_PATTERN.clone(),
            max_age_seconds: 300,
            clock_skew_seconds: 30,
        }
    }

    #[must_use]
    pub fn with_issuer_pattern(mut self, issuer_pattern: Regex) -> Self {
        self.issuer_pattern = issuer_pattern;
        self
    }
}

// ============================================================================
// ID Token Verifier
// ============================================================================

#[derive(Clone)]
pub struct IdTokenVerifier {
    http: reqwest::Client,
    cache: Arc<RwLock<JwksCache>>,
    policy: IdTokenPolicy,
}

impl IdTokenVerifier {
    #[must_use]
    pub fn new(http: reqwest::Client, policy: IdTokenPolicy, cache_duration: Duration) -> Self {
        Self {
            http,
            cache: Arc::new(RwLock::new(JwksCache::new(cache_duration))),
            policy,
        }
    }

    /// Seed the key cache, e.g. from a startup warm-up fetch
    pub async fn preload_keys(&self, jwks_uri: &str, jwks: JsonWebKeySet) {
        self.cache.write().await.store_keys(jwks_uri, jwks.keys);
    }

    /// Fetch JWKS from URI and cache the keys
    ///
    /// # Errors
    ///
    /// Returns `JwksFetchFailed` if the fetch is in back-off, fails, or the
    /// response is not a key set
    pub async fn fetch_and_cache_jwks(&self, jwks_uri: &str) -> Result<(), IdTokenError> {
        if !self.cache.read().await.should_retry_fetch(jwks_uri) {
            return Err(IdTokenError::JwksFetchFailed(
                "Skipping fetch due to recent failure and backoff".to_string(),
            ));
        }

        debug!("🔑 Fetching JWKS from {jwks_uri}");

        match self.fetch_jwks(jwks_uri).await {
            Ok(jwks) => {
                self.cache.write().await.store_keys(jwks_uri, jwks.keys);
                Ok(())
            }
            Err(e) => {
                warn!("JWKS fetch from {jwks_uri} failed: {e}");
                self.cache.write().await.record_fetch_failure(jwks_uri);
                Err(e)
            }
        }
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JsonWebKeySet, IdTokenError> {
        let response = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| IdTokenError::JwksFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IdTokenError::JwksFetchFailed(format!(
                "status {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<JsonWebKeySet>()
            .await
            .map_err(|e| IdTokenError::JwksFetchFailed(format!("Failed to parse JWKS: {e}")))
    }

    /// Resolve the signing key, refreshing the key set once on a miss
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` when the refreshed key set still lacks the key
    pub async fn get_public_key(
        &self,
        jwks_uri: &str,
        kid: Option<&str>,
        kty: &str,
    ) -> Result<JsonWebKey, IdTokenError> {
        {
            let cache = self.cache.read().await;
            if cache.is_cache_valid(jwks_uri) {
                if let Some(key) = cache.find_key(jwks_uri, kid, kty) {
                    debug!("🎯 Found cached key {kid:?}");
                    return Ok(key.clone());
                }
            }
        }

        // Cache miss, expired, or key rotated since the last fetch
        if let Err(e) = self.fetch_and_cache_jwks(jwks_uri).await {
            // Expired keys stay usable while the endpoint is failing
            if let Some(key) = self.cache.read().await.find_key(jwks_uri, kid, kty) {
                warn!("⚠️ Using stale JWKS for {jwks_uri}: {e}");
                return Ok(key.clone());
            }
            return Err(e);
        }

        let cache = self.cache.read().await;
        cache
            .find_key(jwks_uri, kid, kty)
            .cloned()
            .ok_or_else(|| IdTokenError::KeyNotFound(kid.unwrap_or("<none>").to_string()))
    }

    /// Verify an ID token and return its claims
    ///
    /// Checks run in order: signature, audience, freshness, issuer, nonce.
    ///
    /// # Errors
    ///
    /// Returns the first failed check; no failure is retried
    pub async fn verify(
        &self,
        token: &str,
        jwks_uri: &str,
        expected_nonce: Option<&str>,
    ) -> Result<IdentityClaims, IdTokenError> {
        debug!("🔒 Starting ID token verification");

        let parts: Vec<&str> = token.split('.').collect();
        let [header_b64, claims_b64, signature_b64] = parts.as_slice() else {
            return Err(IdTokenError::Malformed("expected three segments".to_string()));
        };

        let header: JwtHeader = decode_segment(header_b64, "header")?;
        let kty = match header.alg.as_str() {
            "RS256" => "RSA",
            "ES256" => "EC",
            alg => return Err(IdTokenError::UnsupportedAlgorithm(alg.to_string())),
        };

        let raw_claims: Value = decode_segment(claims_b64, "claims")?;
        let claims: IdTokenClaims = serde_json::from_value(raw_claims.clone())
            .map_err(|e| IdTokenError::Malformed(format!("Invalid claims: {e}")))?;

        let public_key = self
            .get_public_key(jwks_uri, header.kid.as_deref(), kty)
            .await?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| IdTokenError::Malformed(format!("Invalid signature encoding: {e}")))?;

        match kty {
            "RSA" => verify_rsa_signature(&signing_input, &signature, &public_key)?,
            _ => verify_ecdsa_signature(&signing_input, &signature, &public_key)?,
        }
        debug!("✅ ID token signature verified");

        let identity =
            self.validate_claims(claims, raw_claims, expected_nonce, Utc::now().timestamp())?;

        info!("🎉 ID token verified for issuer {}", identity.issuer);
        Ok(identity)
    }

    /// Claim checks after the signature has been verified
    fn validate_claims(
        &self,
        claims: IdTokenClaims,
        raw: Value,
        expected_nonce: Option<&str>,
        now: i64,
    ) -> Result<IdentityClaims, IdTokenError> {
        let audience = validate_audience(&claims, &self.policy.audience)?;
        let (issued_at, expires_at) = validate_freshness(&claims, &self.policy, now)?;
        let issuer = validate_issuer(&claims, &self.policy.issuer_pattern)?;

        if let Some(expected) = expected_nonce {
            if claims.nonce.as_deref() != Some(expected) {
                return Err(IdTokenError::NonceMismatch);
            }
        }

        let subject = claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or(IdTokenError::MissingClaim("sub"))?;

        Ok(IdentityClaims {
            subject,
            issuer,
            audience,
            email: claims.email,
            preferred_username: claims.preferred_username,
            given_name: claims.given_name,
            family_name: claims.family_name,
            full_name: claims.name,
            nonce: claims.nonce,
            issued_at,
            expires_at,
            raw,
        })
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, IdTokenError> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| IdTokenError::Malformed(format!("Invalid {what} encoding: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| IdTokenError::Malformed(format!("Invalid {what} JSON: {e}")))
}

fn validate_audience(claims: &IdTokenClaims, expected: &str) -> Result<Vec<String>, IdTokenError> {
    let audiences = match &claims.aud {
        Some(Value::String(aud)) => vec![aud.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect(),
        _ => return Err(IdTokenError::MissingClaim("aud")),
    };

    if audiences.iter().any(|aud| aud == expected) {
        Ok(audiences)
    } else {
        Err(IdTokenError::AudienceMismatch {
            expected: expected.to_string(),
            actual: audiences,
        })
    }
}

fn validate_freshness(
    claims: &IdTokenClaims,
    policy: &IdTokenPolicy,
    now: i64,
) -> Result<(i64, i64), IdTokenError> {
    let skew = policy.clock_skew_seconds;

    let exp = claims.exp.ok_or(IdTokenError::MissingClaim("exp"))?;
    if now > exp.saturating_add(skew) {
        return Err(IdTokenError::TokenExpired);
    }

    if let Some(nbf) = claims.nbf {
        if now < nbf.saturating_sub(skew) {
            return Err(IdTokenError::TokenNotYetValid);
        }
    }

    let iat = claims.iat.ok_or(IdTokenError::MissingClaim("iat"))?;
    if iat > now.saturating_add(skew) {
        return Err(IdTokenError::IssuedInFuture);
    }
    let age_seconds = now.saturating_sub(iat);
    if age_seconds > policy.max_age_seconds.saturating_add(skew) {
        return Err(IdTokenError::TokenTooOld { age_seconds });
    }

    Ok((iat, exp))
}

fn validate_issuer(claims: &IdTokenClaims, pattern: &Regex) -> Result<String, IdTokenError> {
    let issuer = claims.iss.as_deref().ok_or(IdTokenError::MissingClaim("iss"))?;
    if pattern.is_match(issuer) {
        Ok(issuer.to_string())
    } else {
        Err(IdTokenError::UnexpectedIssuer(issuer.to_string()))
    }
}

/// Verify an RS256 (RSASSA-PKCS1-v1_5 with SHA-256) signature
fn verify_rsa_signature(
    signing_input: &str,
    signature: &[u8],
    public_key: &JsonWebKey,
) -> Result<(), IdTokenError> {
    use rsa::signature::Verifier;

    let n = public_key
        .n
        .as_ref()
        .ok_or_else(|| IdTokenError::KeyDecodingFailed("Missing RSA modulus (n)".to_string()))?;
    let e = public_key
        .e
        .as_ref()
        .ok_or_else(|| IdTokenError::KeyDecodingFailed("Missing RSA exponent (e)".to_string()))?;

    let n_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(n)
        .map_err(|e| IdTokenError::KeyDecodingFailed(format!("Invalid modulus encoding: {e}")))?;
    let e_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(e)
        .map_err(|e| IdTokenError::KeyDecodingFailed(format!("Invalid exponent encoding: {e}")))?;

    let rsa_key = RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(&n_bytes),
        rsa::BigUint::from_bytes_be(&e_bytes),
    )
    .map_err(|e| IdTokenError::KeyDecodingFailed(format!("Invalid RSA key: {e}")))?;

    let signature = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|_| IdTokenError::SignatureInvalid)?;

    VerifyingKey::<Sha256>::new(rsa_key)
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| IdTokenError::SignatureInvalid)
}

/// Verify an ES256 signature (P-256, raw `r || s` encoding as used by JWS)
fn verify_ecdsa_signature(
    signing_input: &str,
    signature: &[u8],
    public_key: &JsonWebKey,
) -> Result<(), IdTokenError> {
    use p256::ecdsa::signature::Verifier;

    if public_key.crv.as_deref().is_some_and(|crv| crv != "P-256") {
        return Err(IdTokenError::KeyDecodingFailed(
            "Unsupported EC curve".to_string(),
        ));
    }

    let x = public_key
        .x
        .as_ref()
        .ok_or_else(|| IdTokenError::KeyDecodingFailed("Missing ECDSA x coordinate".to_string()))?;
    let y = public_key
        .y
        .as_ref()
        .ok_or_else(|| IdTokenError::KeyDecodingFailed("Missing ECDSA y coordinate".to_string()))?;

    let x_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(x)
        .map_err(|e| IdTokenError::KeyDecodingFailed(format!("Invalid x coordinate: {e}")))?;
    let y_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(y)
        .map_err(|e| IdTokenError::KeyDecodingFailed(format!("Invalid y coordinate: {e}")))?;

    // Uncompressed SEC1 point: 0x04 || x || y
    let mut point_bytes = Vec::with_capacity(1 + x_bytes.len() + y_bytes.len());
    point_bytes.push(0x04);
    point_bytes.extend_from_slice(&x_bytes);
    point_bytes.extend_from_slice(&y_bytes);

    let encoded_point = EncodedPoint::from_bytes(&point_bytes)
        .map_err(|e| IdTokenError::KeyDecodingFailed(format!("Invalid EC point: {e}")))?;
    let verifying_key = EcdsaVerifyingKey::from_encoded_point(&encoded_point)
        .map_err(|e| IdTokenError::KeyDecodingFailed(format!("Invalid ECDSA key: {e}")))?;

    let signature =
        EcdsaSignature::from_slice(signature).map_err(|_| IdTokenError::SignatureInvalid)?;

    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| IdTokenError::SignatureInvalid)
}
