use crate::error::AuthFlowError;
use crate::models::{IdentityClaims, NormalizedProfile};

/// Normalize verified claims into the identity used for the directory
///
/// Email falls back to `preferred_username`. Missing given/family names are
/// filled from the full name: first token is the given name, the remainder
/// the family name.
///
/// # Errors
///
/// Returns `MissingEmail` when neither `email` nor `preferred_username` is usable
pub fn normalize_profile(claims: &IdentityClaims) -> Result<NormalizedProfile, AuthFlowError> {
    let email = non_empty(claims.email.as_deref())
        .or_else(|| non_empty(claims.preferred_username.as_deref()))
        .ok_or(AuthFlowError::MissingEmail)?
        .to_lowercase();

    let full_name = non_empty(claims.full_name.as_deref()).unwrap_or_default();
    let (split_given, split_family) = split_full_name(full_name);

    let given_name = non_empty(claims.given_name.as_deref())
        .map_or(split_given, str::to_string);
    let family_name = non_empty(claims.family_name.as_deref())
        .map_or(split_family, str::to_string);

    let display_name = if full_name.is_empty() {
        [given_name.as_str(), family_name.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        full_name.to_string()
    };

    Ok(NormalizedProfile {
        subject: claims.subject.clone(),
        email,
        given_name,
        family_name,
        display_name,
        raw_claims: claims.raw.clone(),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn split_full_name(full_name: &str) -> (String, String) {
    let mut tokens = full_name.split_whitespace();
    let given = tokens.next().unwrap_or_default().to_string();
    let family = tokens.collect::<Vec<_>>().join(" ");
    (given, family)
}
