//! Test fixtures providing pre-built test objects
//!
//! Signing keys for a fake identity provider, ID token minting, and settings
//! pointing at mock servers.

use std::sync::OnceLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use serde_json::{json, Value};

use crate::oauth::{JsonWebKey, JsonWebKeySet};
use crate::session::AuthTransaction;
use crate::settings::BridgeSettings;

pub const TEST_CLIENT_ID: &str = "6f1c2a9e-0d4b-4c8e-9a57-3b2f1e0c7d11";
pub const TEST_CLIENT_SECRET: &str = "test-client-secret";
pub const TEST_ISSUER_HOST: &str = "login.example.com";
pub const TEST_ISSUER: &str =
    "https://login.example.com/11111111-2222-3333-4444-555555555555/v2.0";
pub const TEST_RSA_KID: &str = "test-rsa-key";
pub const TEST_EC_KID: &str = "test-ec-key";
pub const TEST_SUBJECT: &str = "idp-subject-123";
pub const TEST_EMAIL: &str = "Ada.Lovelace@Example.com";
pub const TEST_STATE: &str = "state-0123456789";
pub const TEST_COOKIE_SECRET: &str = "test-cookie-secret-for-memberbridge";
pub const TEST_APP_BASE_URL: &str = "https://app.example.com";

const RSA_SIGNING_KEY_PEM: &str = include_str!("../../tests/fixtures/idp_signing_key.pem");
const EC_SIGNING_KEY_PEM: &str = include_str!("../../tests/fixtures/idp_ec_signing_key.pem");

fn rsa_signing_key() -> &'static rsa::RsaPrivateKey {
    static KEY: OnceLock<rsa::RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        use rsa::pkcs8::DecodePrivateKey;
        rsa::RsaPrivateKey::from_pkcs8_pem(RSA_SIGNING_KEY_PEM).unwrap()
    })
}

fn ec_signing_key() -> &'static p256::ecdsa::SigningKey {
    static KEY: OnceLock<p256::ecdsa::SigningKey> = OnceLock::new();
    KEY.get_or_init(|| {
        use p256::pkcs8::DecodePrivateKey;
        p256::ecdsa::SigningKey::from_pkcs8_pem(EC_SIGNING_KEY_PEM).unwrap()
    })
}

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Claims of a fresh, valid ID token for [`TEST_CLIENT_ID`]
    #[must_use]
    pub fn id_token_claims(nonce: &str) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": TEST_ISSUER,
            "aud": TEST_CLIENT_ID,
            "sub": TEST_SUBJECT,
            "iat": now,
            "nbf": now,
            "exp": now + 3600,
            "nonce": nonce,
            "email": TEST_EMAIL,
            "name": "Ada Lovelace",
            "given_name": "",
            "family_name": "",
            "preferred_username": "ada@example.com",
        })
    }

    fn signing_input(alg: &str, kid: &str, claims: &Value) -> String {
        let header = json!({ "alg": alg, "typ": "JWT", "kid": kid });
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    /// Compact JWS signed with the fixture RSA key
    #[must_use]
    pub fn sign_rs256(claims: &Value, kid: &str) -> String {
        use rsa::signature::{SignatureEncoding, Signer};

        let input = Self::signing_input("RS256", kid, claims);
        let signer = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(rsa_signing_key().clone());
        let signature = signer.sign(input.as_bytes()).to_bytes();
        format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature))
    }

    /// Compact JWS signed with the fixture P-256 key
    #[must_use]
    pub fn sign_es256(claims: &Value, kid: &str) -> String {
        use p256::ecdsa::signature::Signer;

        let input = Self::signing_input("ES256", kid, claims);
        let signature: p256::ecdsa::Signature = ec_signing_key().sign(input.as_bytes());
        format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }

    #[must_use]
    pub fn rsa_jwk() -> JsonWebKey {
        use rsa::traits::PublicKeyParts;

        let public = rsa_signing_key().to_public_key();
        JsonWebKey {
            kty: "RSA".to_string(),
            kid: Some(TEST_RSA_KID.to_string()),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(URL_SAFE_NO_PAD.encode(public.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(public.e().to_bytes_be())),
            crv: None,
            x: None,
            y: None,
        }
    }

    #[must_use]
    pub fn ec_jwk() -> JsonWebKey {
        let point = ec_signing_key().verifying_key().to_encoded_point(false);
        JsonWebKey {
            kty: "EC".to_string(),
            kid: Some(TEST_EC_KID.to_string()),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: point.x().map(|x| URL_SAFE_NO_PAD.encode(x)),
            y: point.y().map(|y| URL_SAFE_NO_PAD.encode(y)),
        }
    }

    #[must_use]
    pub fn jwks() -> JsonWebKeySet {
        JsonWebKeySet {
            keys: vec![Self::rsa_jwk(), Self::ec_jwk()],
        }
    }

    #[must_use]
    pub fn jwks_json() -> Value {
        serde_json::to_value(Self::jwks()).unwrap()
    }

    /// Transaction with a known state and nonce, as if `/auth/login` had run
    #[must_use]
    pub fn transaction(nonce: &str, return_to: &str) -> AuthTransaction {
        AuthTransaction {
            state: TEST_STATE.to_string(),
            nonce: nonce.to_string(),
            ..AuthTransaction::generate(return_to)
        }
    }

    /// Settings wired to a mock identity provider and a mock directory
    #[must_use]
    pub fn settings(idp_base: &str, directory_base: &str) -> BridgeSettings {
        let mut settings = BridgeSettings::default();

        settings.application.app_base_url = TEST_APP_BASE_URL.to_string();
        settings.application.assets_folder = "does-not-exist".to_string();

        settings.idp.discovery_url = format!("{idp_base}/.well-known/openid-configuration");
        settings.idp.client_id = TEST_CLIENT_ID.to_string();
        settings.idp.client_secret = TEST_CLIENT_SECRET.to_string();
        settings.idp.redirect_uri = format!("{TEST_APP_BASE_URL}/auth/callback");
        settings.idp.issuer_host = TEST_ISSUER_HOST.to_string();
        settings.idp.http_timeout_seconds = 5;

        settings.directory.api_base = directory_base.to_string();
        settings.directory.secret_key = "sk_test_123".to_string();
        settings.directory.public_key = "pk_test_456".to_string();
        settings.directory.request_timeout_seconds = 5;

        settings.session.cookie_secret = TEST_COOKIE_SECRET.to_string();
        settings.cookies.secure = false;
        settings
    }
}
