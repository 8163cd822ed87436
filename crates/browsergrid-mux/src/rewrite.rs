//! URL rewriting for CDP HTTP responses (spec.md §4.7 "URL rewriting").
//!
//! `/json/version`, `/json`, `/json/list`, `/json/new` responses embed
//! `webSocketDebuggerUrl` and `devtoolsFrontendUrl` fields whose host is
//! the upstream browser's own bind address. Clients never see that
//! address directly, so both fields need their host swapped for the
//! public-facing one, and `webSocketDebuggerUrl`'s scheme coerced from
//! `http(s)` to `ws(s)`.

use serde_json::Value;

const WS_FIELD: &str = "webSocketDebuggerUrl";
const FRONTEND_FIELD: &str = "devtoolsFrontendUrl";

/// Splits a URL into `(scheme, rest)` on the first `"://"`. Returns
/// `None` if the string has no scheme separator.
fn split_scheme(url: &str) -> Option<(&str, &str)> {
    url.split_once("://")
}

fn coerce_to_ws_scheme(scheme: &str) -> &'static str {
    match scheme {
        "https" => "wss",
        _ => "ws",
    }
}

/// Rewrites a single URL's host (the segment up to the first `/` after
/// the scheme) to `public_host`, optionally coercing the scheme to
/// `ws`/`wss`.
fn rewrite_url(url: &str, public_host: &str, coerce_ws: bool) -> Option<String> {
    let (scheme, rest) = split_scheme(url)?;
    let (_old_host, path) = rest.split_once('/').unwrap_or((rest, ""));
    let scheme = if coerce_ws { coerce_to_ws_scheme(scheme) } else { scheme };
    Some(if path.is_empty() {
        format!("{scheme}://{public_host}")
    } else {
        format!("{scheme}://{public_host}/{path}")
    })
}

/// Rewrites the debugger-URL fields of one CDP target object in place.
fn rewrite_object(obj: &mut serde_json::Map<String, Value>, public_host: &str) {
    if let Some(Value::String(ws)) = obj.get(WS_FIELD) {
        if let Some(rewritten) = rewrite_url(ws, public_host, true) {
            obj.insert(WS_FIELD.to_string(), Value::String(rewritten));
        }
    }
    if let Some(Value::String(frontend)) = obj.get(FRONTEND_FIELD) {
        if let Some(rewritten) = rewrite_url(frontend, public_host, false) {
            obj.insert(FRONTEND_FIELD.to_string(), Value::String(rewritten));
        }
    }
}

/// Rewrites every target object's debugger-URL fields in a decoded CDP
/// HTTP response (`/json/version` and `/json/new` are single objects;
/// `/json` and `/json/list` are arrays of them).
pub fn rewrite_response(body: &mut Value, public_host: &str) {
    match body {
        Value::Object(obj) => rewrite_object(obj, public_host),
        Value::Array(items) => {
            for item in items {
                if let Value::Object(obj) = item {
                    rewrite_object(obj, public_host);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_ws_debugger_url_and_coerces_scheme() {
        let mut body = serde_json::json!({
            "webSocketDebuggerUrl": "ws://browser:9222/devtools/browser/abc",
        });
        rewrite_response(&mut body, "proxy.example:8080");
        assert_eq!(
            body["webSocketDebuggerUrl"],
            "ws://proxy.example:8080/devtools/browser/abc"
        );
    }

    #[test]
    fn coerces_http_scheme_to_ws() {
        let mut body = serde_json::json!({
            "webSocketDebuggerUrl": "http://browser:9222/devtools/browser/abc",
        });
        rewrite_response(&mut body, "proxy.example:8080");
        assert_eq!(
            body["webSocketDebuggerUrl"],
            "ws://proxy.example:8080/devtools/browser/abc"
        );
    }

    #[test]
    fn coerces_https_scheme_to_wss() {
        let mut body = serde_json::json!({
            "webSocketDebuggerUrl": "https://browser:9222/devtools/browser/abc",
        });
        rewrite_response(&mut body, "proxy.example:8080");
        assert_eq!(
            body["webSocketDebuggerUrl"],
            "wss://proxy.example:8080/devtools/browser/abc"
        );
    }

    #[test]
    fn rewrites_devtools_frontend_url_host_preserving_scheme() {
        let mut body = serde_json::json!({
            "devtoolsFrontendUrl": "http://browser:9222/devtools/inspector.html?ws=browser:9222/devtools/browser/abc",
        });
        rewrite_response(&mut body, "proxy.example:8080");
        assert!(body["devtoolsFrontendUrl"]
            .as_str()
            .unwrap()
            .starts_with("http://proxy.example:8080/"));
    }

    #[test]
    fn rewrites_array_responses() {
        let mut body = serde_json::json!([
            { "webSocketDebuggerUrl": "ws://browser:9222/devtools/page/1" },
            { "webSocketDebuggerUrl": "ws://browser:9222/devtools/page/2" },
        ]);
        rewrite_response(&mut body, "proxy.example:8080");
        assert_eq!(body[0]["webSocketDebuggerUrl"], "ws://proxy.example:8080/devtools/page/1");
        assert_eq!(body[1]["webSocketDebuggerUrl"], "ws://proxy.example:8080/devtools/page/2");
    }
}
