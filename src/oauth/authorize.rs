use url::Url;

use crate::error::AuthFlowError;
use crate::session::transaction::AuthTransaction;
use crate::utils::crypto::pkce_challenge;

/// Static client parameters of the authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationParams<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
}

/// Build the IdP authorization redirect for a login transaction
///
/// Any query already present on the endpoint is preserved. The code
/// challenge is derived from the transaction's verifier and never stored.
///
/// # Errors
///
/// Returns `DiscoveryUnavailable` if the advertised endpoint is not an absolute URL
pub fn build_authorization_url(
    authorization_endpoint: &str,
    params: &AuthorizationParams<'_>,
    transaction: &AuthTransaction,
) -> Result<String, AuthFlowError> {
    let mut url = Url::parse(authorization_endpoint).map_err(|e| {
        AuthFlowError::DiscoveryUnavailable(format!("invalid authorization endpoint: {e}"))
    })?;

    url.query_pairs_mut()
        .append_pair("client_id", params.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", params.redirect_uri)
        .append_pair("scope", params.scope)
        .append_pair("state", &transaction.state)
        .append_pair("nonce", &transaction.nonce)
        .append_pair("code_challenge", &pkce_challenge(&transaction.code_verifier))
        .append_pair("code_challenge_method", "S256");

    Ok(url.into())
}
