use crate::models::HealthResponse;
use crate::settings::BridgeSettings;
use actix_web::{http::header, web, HttpResponse, Result};
use log::debug;

const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sign in</title>
    <style>
        body { font-family: system-ui, 'Segoe UI', Arial, sans-serif; margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center; background: #f4f5f7; }
        .card { background: white; padding: 40px; border-radius: 12px; box-shadow: 0 15px 35px rgba(0, 0, 0, 0.1); text-align: center; }
        a.button { display: inline-block; padding: 12px 24px; border-radius: 8px; background: #2f2f8f; color: white; text-decoration: none; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Welcome</h1>
        <p>Sign in with your organization account to continue.</p>
        <p><a class="button" href="/auth/login?returnTo=/dashboard">Sign in</a></p>
    </div>
</body>
</html>
"#;

const FALLBACK_DASHBOARD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Dashboard</title>
    <style>
        body { font-family: system-ui, 'Segoe UI', Arial, sans-serif; margin: 2rem; }
    </style>
</head>
<body>
    <h1>Dashboard</h1>
    <p id="who">Loading…</p>
    <form method="post" action="/logout"><button type="submit">Sign out</button></form>
    <script>
    fetch('/api/me', { credentials: 'same-origin' })
        .then(function (res) { return res.ok ? res.json() : null; })
        .then(function (body) {
            var who = document.getElementById('who');
            if (body && body.user) {
                who.textContent = 'Signed in as ' + body.user.email;
            } else {
                window.location.replace('/auth/login?returnTo=/dashboard');
            }
        });
    </script>
</body>
</html>
"#;

/// Health check endpoint
///
/// # Errors
/// Returns an error if health status cannot be determined
pub async fn health() -> Result<HttpResponse> {
    let response = HealthResponse {
        status: "ok".to_string(),
        message: "memberbridge is running".to_string(),
    };
    Ok(HttpResponse::Ok().json(response))
}

/// Landing page
///
/// # Errors
/// Never fails; a built-in page is served when the assets folder has none
pub async fn index_page(settings: web::Data<BridgeSettings>) -> Result<HttpResponse> {
    Ok(html_page(&page_html(&settings, "index.html", FALLBACK_INDEX)))
}

/// Post-login dashboard
///
/// # Errors
/// Never fails; a built-in page is served when the assets folder has none
pub async fn dashboard_page(settings: web::Data<BridgeSettings>) -> Result<HttpResponse> {
    Ok(html_page(&page_html(&settings, "dashboard.html", FALLBACK_DASHBOARD)))
}

/// Page from the configured assets folder, or `fallback` when it is absent
#[must_use]
pub fn page_html(settings: &BridgeSettings, filename: &str, fallback: &str) -> String {
    let html_path = format!("{}/{}", settings.application.assets_folder, filename);
    std::fs::read_to_string(&html_path).unwrap_or_else(|_| {
        debug!("Static page not found at {html_path}, using built-in page");
        fallback.to_string()
    })
}

fn html_page(body: &str) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
        .body(body.to_string())
}
