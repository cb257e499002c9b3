// Authentication handlers: login, callback, logout
use actix_web::{web, HttpRequest, HttpResponse, ResponseError, Result};
use log::{error, warn};
use serde::Deserialize;

use crate::error::AuthFlowError;
use crate::flow::AuthFlow;
use crate::models::SessionEstablishmentResult;
use crate::oauth::OAuthCallback;
use crate::settings::BridgeSettings;
use crate::utils::responses::ResponseBuilder;

use super::bridge_page::{render_bridge_page, BridgePage};

#[derive(Deserialize, Debug, Default)]
pub struct LoginQuery {
    #[serde(rename = "returnTo")]
    pub return_to: Option<String>,
}

/// Start a login and redirect to the identity provider
///
/// # Errors
///
/// Returns `DiscoveryUnavailable` (rendered as an error page) when the
/// provider metadata cannot be loaded
pub async fn login(
    query: web::Query<LoginQuery>,
    flow: web::Data<AuthFlow>,
) -> Result<HttpResponse, AuthFlowError> {
    let redirect = flow.begin(query.return_to.as_deref()).await?;
    Ok(ResponseBuilder::redirect_with_cookies(
        &redirect.authorization_url,
        vec![redirect.transaction_cookie],
    ))
}

/// Identity provider redirect target
///
/// The transaction cookie is cleared on every response. A successful flow
/// sets the application session cookie and answers according to the session
/// mechanism: bridging page for a token, redirect for a magic link or a bare
/// redirect.
///
/// # Errors
///
/// Never fails; flow errors are rendered as error pages
pub async fn callback(
    query: web::Query<OAuthCallback>,
    req: HttpRequest,
    flow: web::Data<AuthFlow>,
    settings: web::Data<BridgeSettings>,
) -> Result<HttpResponse> {
    let transactions = flow.transactions();
    let clear_transaction = transactions.clear_cookie();

    let sealed = req
        .cookie(transactions.cookie_name())
        .map(|cookie| cookie.value().to_string());
    let transaction = match transactions.consume(sealed.as_deref()) {
        Ok(transaction) => transaction,
        Err(e) => {
            warn!("Callback without a usable login transaction: {e}");
            return Ok(flow_error_page(&e, clear_transaction));
        }
    };

    let outcome = match flow.complete(&transaction, &query.into_inner()).await {
        Ok(outcome) => outcome,
        Err(failure) => return Ok(flow_error_page(&failure.error, clear_transaction)),
    };

    let mut cookies = vec![clear_transaction];
    match flow.cookies().create_app_session_cookie(
        &settings.session.session_cookie_name,
        &outcome.app_session(),
        settings.session.session_duration_days,
    ) {
        Ok(cookie) => cookies.push(cookie),
        Err(e) => error!(
            "[{}] Failed to seal application session: {e}",
            outcome.correlation_id
        ),
    }

    Ok(match &outcome.session {
        SessionEstablishmentResult::Token { token, destination } => {
            let page = BridgePage {
                token,
                destination,
                script_url: &settings.directory.script_url,
                public_key: &settings.directory.public_key,
            };
            ResponseBuilder::html_with_cookies(render_bridge_page(&page), cookies)
        }
        SessionEstablishmentResult::MagicLink { url } => {
            ResponseBuilder::redirect_with_cookies(url, cookies)
        }
        SessionEstablishmentResult::RedirectOnly { destination } => {
            ResponseBuilder::redirect_with_cookies(destination, cookies)
        }
    })
}

fn flow_error_page(
    error: &AuthFlowError,
    clear_transaction: actix_web::cookie::Cookie<'static>,
) -> HttpResponse {
    ResponseBuilder::error_page_with_cookies(
        error.status_code(),
        error.code(),
        error.public_message(),
        vec![clear_transaction],
    )
}

/// Clear the application session and return to the landing page
///
/// # Errors
///
/// Never fails
pub async fn logout(
    flow: web::Data<AuthFlow>,
    settings: web::Data<BridgeSettings>,
) -> Result<HttpResponse> {
    let clear = flow
        .cookies()
        .create_expired_cookie(&settings.session.session_cookie_name);
    Ok(ResponseBuilder::redirect_with_cookies("/", vec![clear]))
}
