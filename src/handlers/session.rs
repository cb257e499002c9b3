// Application session API
use actix_web::{web, HttpRequest, HttpResponse, Result};
use log::debug;
use serde_json::json;

use crate::flow::AuthFlow;
use crate::settings::BridgeSettings;
use crate::utils::responses::ResponseBuilder;

/// Current user from the application session cookie
///
/// # Errors
/// Never fails; missing or unreadable sessions are 401 responses
pub async fn current_user(
    req: HttpRequest,
    flow: web::Data<AuthFlow>,
    settings: web::Data<BridgeSettings>,
) -> Result<HttpResponse> {
    match flow
        .cookies()
        .get_app_session(&req, &settings.session.session_cookie_name)
    {
        Ok(Some(session)) => Ok(ResponseBuilder::json(&json!({ "user": session }))),
        Ok(None) => Ok(ResponseBuilder::not_authenticated()),
        Err(e) => {
            debug!("Unreadable application session cookie: {e}");
            Ok(ResponseBuilder::invalid_session())
        }
    }
}
