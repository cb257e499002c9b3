// Browser page that hands a directory session token to the membership script
use crate::utils::responses::escape_html;

/// Milliseconds to wait for the membership script before calling it anyway
pub const READY_FALLBACK_MS: u32 = 4000;
/// Milliseconds after which the page leaves regardless of the script
pub const HARD_REDIRECT_MS: u32 = 5000;

/// Inputs of the bridging page
pub struct BridgePage<'a> {
    pub token: &'a str,
    pub destination: &'a str,
    pub script_url: &'a str,
    pub public_key: &'a str,
}

/// JSON string literal safe to embed inside a `<script>` element
#[must_use]
pub fn script_string_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string())
        .to_string()
        .replace('<', "\\u003c")
}

#[must_use]
pub fn render_bridge_page(page: &BridgePage<'_>) -> String {
    let token = script_string_literal(page.token);
    let destination = script_string_literal(page.destination);
    let script_url = escape_html(page.script_url);
    let public_key = escape_html(page.public_key);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta name="robots" content="noindex">
    <title>Signing you in…</title>
    <script data-memberstack-app="{public_key}" src="{script_url}" async></script>
</head>
<body>
    <p style="font-family: system-ui, 'Segoe UI', Arial, sans-serif; margin: 2rem;">Signing you in…</p>
    <script>
    (function () {{
        var done = false;
        function go() {{
            if (done) return;
            done = true;
            window.location.replace({destination});
        }}
        function onReady(fn) {{
            if (window.MemberStack && window.MemberStack.onReady) {{
                return window.MemberStack.onReady.then(fn).catch(go);
            }}
            document.addEventListener('msready', function () {{ onReady(fn); }}, {{ once: true }});
            setTimeout(fn, {READY_FALLBACK_MS});
        }}
        onReady(async function (ms) {{
            try {{
                ms = ms || (window.MemberStack && (await window.MemberStack.onReady));
                if (ms && ms.loginWithToken) {{
                    await ms.loginWithToken({token});
                }}
            }} catch (_) {{}}
            go();
        }});
        setTimeout(go, {HARD_REDIRECT_MS});
    }})();
    </script>
</body>
</html>"#
    )
}
