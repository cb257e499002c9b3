// Cryptographic utilities for login transactions, PKCE and sealed cookies

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use rand::{distr::Alphanumeric, Rng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Random bytes behind each `state` and `nonce` value
pub const STATE_TOKEN_BYTES: usize = 24;

/// Random bytes behind each PKCE code verifier (86 characters once encoded)
pub const CODE_VERIFIER_BYTES: usize = 64;

/// Generate a base64url (unpadded) string from `length` bytes of secure random data
#[must_use]
pub fn generate_random_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate an opaque token suitable for the OAuth `state` or OIDC `nonce` parameter
///
/// 24 bytes (192 bits) of entropy encode to 32 URL-safe characters.
#[must_use]
pub fn generate_state_token() -> String {
    generate_random_token(STATE_TOKEN_BYTES)
}

/// Generate a PKCE code verifier
///
/// RFC 7636 requires 43-128 characters from the unreserved set; the
/// base64url alphabet is a subset of it.
#[must_use]
pub fn generate_code_verifier() -> String {
    generate_random_token(CODE_VERIFIER_BYTES)
}

/// Compute the S256 PKCE code challenge: `base64url(SHA-256(verifier))`
#[must_use]
pub fn pkce_challenge(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Generate a random alphanumeric password for directory accounts that only
/// ever sign in through the identity provider
#[must_use]
pub fn generate_member_password(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generic encryption function for any serializable data using AES-256-GCM
///
/// # Arguments
///
/// * `data` - The data to encrypt (must implement Serialize)
/// * `key` - The encryption key (must be 32 bytes for AES-256)
///
/// # Returns
///
/// A Base64URL-encoded string containing the nonce + ciphertext
///
/// # Errors
///
/// Returns an error if:
/// - Serialization fails
/// - Key length is invalid
/// - AES encryption fails
pub fn encrypt_data<T: Serialize>(data: &T, key: &[u8]) -> Result<String> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {} bytes, got {}",
            ENCRYPTION_KEY_SIZE,
            key.len()
        ));
    }

    let json_data = serde_json::to_string(data).context("Failed to serialize data")?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, json_data.as_bytes())
        .map_err(|e| anyhow!("AES encryption failed: {e}"))?;

    // nonce || ciphertext
    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&combined))
}

/// Generic decryption function for any deserializable data using AES-256-GCM
///
/// # Errors
///
/// Returns an error if:
/// - Key length is invalid
/// - Base64 decoding fails
/// - Data length is invalid
/// - AES decryption fails (including any tampering with the ciphertext)
/// - Deserialization fails
pub fn decrypt_data<T: DeserializeOwned>(encrypted_data: &str, key: &[u8]) -> Result<T> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {} bytes, got {}",
            ENCRYPTION_KEY_SIZE,
            key.len()
        ));
    }

    let combined = general_purpose::URL_SAFE_NO_PAD
        .decode(encrypted_data)
        .context("Failed to decode base64 data")?;

    if combined.len() < NONCE_SIZE {
        return Err(anyhow!("Invalid data length"));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("AES decryption failed: {e}"))?;

    serde_json::from_slice(&plaintext).context("Failed to deserialize data from decrypted JSON")
}

/// Derive the 32-byte cookie sealing key from the configured cookie secret
#[must_use]
pub fn derive_encryption_key(input_key: &[u8]) -> [u8; ENCRYPTION_KEY_SIZE] {
    Sha256::digest(input_key).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sealed {
        state: String,
        count: u32,
    }

    #[test]
    fn test_pkce_challenge_matches_rfc7636_vector() {
        // RFC 7636 Appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_code_verifier_length_and_alphabet() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 86);
        assert!((43..=128).contains(&verifier.len()));
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_state_tokens_are_unique() {
        let a = generate_state_token();
        let b = generate_state_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_member_password() {
        let password = generate_member_password(24);
        assert_eq!(password.len(), 24);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = derive_encryption_key(b"cookie-secret");
        let data = Sealed {
            state: "abc".to_string(),
            count: 3,
        };

        let sealed = encrypt_data(&data, &key).unwrap();
        let opened: Sealed = decrypt_data(&sealed, &key).unwrap();
        assert_eq!(opened, data);
    }

    #[test]
    fn test_decrypt_rejects_tampering_and_wrong_key() {
        let key = derive_encryption_key(b"cookie-secret");
        let other_key = derive_encryption_key(b"another-secret");
        let sealed = encrypt_data(
            &Sealed {
                state: "abc".to_string(),
                count: 1,
            },
            &key,
        )
        .unwrap();

        assert!(decrypt_data::<Sealed>(&sealed, &other_key).is_err());

        let mut bytes = general_purpose::URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        assert!(decrypt_data::<Sealed>(&tampered, &key).is_err());

        assert!(decrypt_data::<Sealed>("not-base64!", &key).is_err());
        assert!(decrypt_data::<Sealed>("", &key).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(encrypt_data(&"x", &[0u8; 16]).is_err());
        assert!(decrypt_data::<String>("AAAA", &[0u8; 16]).is_err());
    }

    #[test]
    fn test_derive_encryption_key_is_stable() {
        assert_eq!(derive_encryption_key(b"a"), derive_encryption_key(b"a"));
        assert_ne!(derive_encryption_key(b"a"), derive_encryption_key(b"b"));
    }
}
