// Integration tests for the public API: settings, flow construction and routes
use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use memberbridge::{configure_routes, AuthFlow, BridgeSettings};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings_for(idp_base: &str) -> BridgeSettings {
    let mut settings = BridgeSettings::default();
    settings.idp.discovery_url = format!("{idp_base}/.well-known/openid-configuration");
    settings.idp.client_id = "integration-client".to_string();
    settings.idp.redirect_uri = "https://app.example.com/auth/callback".to_string();
    settings.session.cookie_secret = "integration-cookie-secret".to_string();
    settings.cookies.secure = false;
    settings
}

#[::core::prelude::v1::test]
fn test_default_settings_require_identity_provider() {
    let error = BridgeSettings::default().validate().unwrap_err();
    assert!(error.contains("IDP_DISCOVERY_URL"));
    assert!(error.contains("IDP_CLIENT_ID"));

    assert!(settings_for("https://idp.example.com").validate().is_ok());
}

#[actix_web::test]
async fn test_login_round_trip_through_routes() {
    let idp = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorization_endpoint": format!("{}/oauth2/v2.0/authorize?p=policy", idp.uri()),
            "token_endpoint": format!("{}/oauth2/v2.0/token", idp.uri()),
            "jwks_uri": format!("{}/discovery/v2.0/keys", idp.uri()),
        })))
        .expect(1)
        .mount(&idp)
        .await;

    let settings = settings_for(&idp.uri());
    let flow = AuthFlow::from_settings(&settings).unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(flow))
            .app_data(web::Data::new(settings))
            .configure(configure_routes),
    )
    .await;

    // Two logins share one cached discovery document
    for _ in 0..2 {
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/auth/login?returnTo=https://evil.example").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.contains("/oauth2/v2.0/authorize?p=policy&client_id=integration-client"));
        assert!(location.contains("code_challenge_method=S256"));
        assert!(resp.response().cookies().any(|cookie| cookie.name() == "oidc_tmp"));
    }
}

#[actix_web::test]
async fn test_login_with_discovery_outage_shows_error_page() {
    let idp = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&idp)
        .await;

    let settings = settings_for(&idp.uri());
    let flow = AuthFlow::from_settings(&settings).unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(flow))
            .app_data(web::Data::new(settings))
            .configure(configure_routes),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/auth/login").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = test::read_body(resp).await;
    assert!(std::str::from_utf8(&body).unwrap().contains("discovery_unavailable"));
}

#[actix_web::test]
async fn test_callback_without_login_and_anonymous_me() {
    let settings = settings_for("http://127.0.0.1:9");
    let flow = AuthFlow::from_settings(&settings).unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(flow))
            .app_data(web::Data::new(settings))
            .configure(configure_routes),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/auth/callback?code=abc&state=xyz").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/me").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
