//! HTTP response handling
//!
//! Consistent constructors for the redirects, HTML pages and small JSON
//! bodies the login bridge sends back to browsers.

use actix_web::{cookie::Cookie, http::header, http::StatusCode, HttpResponse};
use serde_json::json;

// ===============================
// CACHED RESPONSES
// ===============================

/// Pre-serialized JSON bodies for the session API
static CACHED_RESPONSES: std::sync::LazyLock<CachedResponses> =
    std::sync::LazyLock::new(CachedResponses::new);

struct CachedResponses {
    not_authenticated: String,
    invalid_session: String,
}

impl CachedResponses {
    fn new() -> Self {
        Self {
            not_authenticated: json!({ "error": "not_authenticated" }).to_string(),
            invalid_session: json!({ "error": "invalid_session" }).to_string(),
        }
    }
}

/// Unified response builder
pub struct ResponseBuilder;

impl ResponseBuilder {
    // ===============================
    // REDIRECTS AND PAGES
    // ===============================

    /// Create a 302 redirect carrying the given cookies
    #[must_use]
    pub fn redirect_with_cookies(location: &str, cookies: Vec<Cookie<'static>>) -> HttpResponse {
        let mut builder = HttpResponse::Found();
        for cookie in cookies {
            builder.cookie(cookie);
        }

        builder
            .insert_header((header::LOCATION, location.to_string()))
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .finish()
    }

    /// Create a 200 HTML response carrying the given cookies
    #[must_use]
    pub fn html_with_cookies(body: String, cookies: Vec<Cookie<'static>>) -> HttpResponse {
        let mut builder = HttpResponse::Ok();
        for cookie in cookies {
            builder.cookie(cookie);
        }

        builder
            .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .body(body)
    }

    /// Generic error page; shows a stable error code and a fixed message only
    #[must_use]
    pub fn error_page(status: StatusCode, code: &str, message: &str) -> HttpResponse {
        HttpResponse::build(status)
            .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .body(render_error_page(code, message))
    }

    /// Same as [`Self::error_page`] but also sets cookies (used to clear the
    /// login transaction on failed callbacks)
    #[must_use]
    pub fn error_page_with_cookies(
        status: StatusCode,
        code: &str,
        message: &str,
        cookies: Vec<Cookie<'static>>,
    ) -> HttpResponse {
        let mut builder = HttpResponse::build(status);
        for cookie in cookies {
            builder.cookie(cookie);
        }

        builder
            .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .body(render_error_page(code, message))
    }

    // ===============================
    // JSON
    // ===============================

    /// 401 for a request without an application session
    #[must_use]
    pub fn not_authenticated() -> HttpResponse {
        HttpResponse::Unauthorized()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(CACHED_RESPONSES.not_authenticated.clone())
    }

    /// 401 for an application session cookie that cannot be opened
    #[must_use]
    pub fn invalid_session() -> HttpResponse {
        HttpResponse::Unauthorized()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(CACHED_RESPONSES.invalid_session.clone())
    }

    /// 200 JSON response
    #[must_use]
    pub fn json<T: serde::Serialize>(data: &T) -> HttpResponse {
        HttpResponse::Ok()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .json(data)
    }
}

/// Escape text for inclusion in HTML element content or a quoted attribute
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn render_error_page(code: &str, message: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Sign-in problem</title>
</head>
<body>
<main>
<h1>Sign-in problem</h1>
<p>{message}</p>
<p><small>Error code: <code>{code}</code></small></p>
<p><a href="/auth/login">Try again</a></p>
</main>
</body>
</html>
"#,
        message = escape_html(message),
        code = escape_html(code),
    )
}
