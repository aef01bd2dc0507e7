//! Authenticated requests from inside the page.
//!
//! The portal's anti-bot layer keys off browser-level network identity —
//! cookies, TLS fingerprint, header ordering. An out-of-process HTTP client
//! reproduces none of that, so every portal call here is a `fetch` executed
//! in the page's own realm: the browser supplies the session cookies and the
//! exact network stack the login used. The shim only adds the functional
//! headers the page scripts would add themselves (form content type, CSRF).

use std::time::Duration;

use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PortalError, PORTAL_ORIGIN};
use crate::browser::BrowserSession;

/// Terminal state of one in-page request. Redirects are followed by the
/// browser; `final_url` is where the chain ended, which callers use to detect
/// redirect-based outcomes (invoice landing, login bounce).
#[derive(Debug, Clone, Deserialize)]
pub struct PortalResponse {
    pub status: u16,
    #[serde(rename = "url")]
    pub final_url: String,
    pub body: String,
}

#[derive(Serialize)]
struct ShimRequest<'a> {
    method: &'a str,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<&'a str>,
}

/// The in-page fetch catches its own failures so a network fault comes back
/// as data instead of a script exception.
#[derive(Deserialize)]
struct ShimResult {
    #[serde(default)]
    ok: Option<PortalResponse>,
    #[serde(default)]
    err: Option<String>,
}

pub struct PortalClient {
    session_page: chromiumoxide::Page,
    csrf_token: Option<String>,
}

impl PortalClient {
    pub fn new(session: &BrowserSession) -> Self {
        Self {
            session_page: session.page().clone(),
            csrf_token: None,
        }
    }

    /// Remember the freshest CSRF token seen in page metadata. Later pages may
    /// rotate it; last write wins.
    pub fn set_csrf_token(&mut self, token: String) {
        self.csrf_token = Some(token);
    }

    pub fn get(&self, url: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, "GET", url)
    }

    pub fn post<'a>(&'a self, url: &str, body: &'a str) -> RequestBuilder<'a> {
        let mut b = RequestBuilder::new(self, "POST", url);
        b.body = Some(body);
        b
    }

    async fn execute(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
        extra_headers: Vec<(String, String)>,
    ) -> Result<PortalResponse, PortalError> {
        let target = resolve_url(url);

        let mut headers = extra_headers;
        if method == "POST"
            && body.is_some()
            && !headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        {
            headers.push((
                "Content-Type".into(),
                "application/x-www-form-urlencoded".into(),
            ));
        }
        if let Some(token) = &self.csrf_token {
            if !headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("x-csrf-token"))
            {
                headers.push(("X-CSRF-TOKEN".into(), token.clone()));
            }
        }

        let request = ShimRequest {
            method,
            url: target,
            headers,
            body,
        };
        let payload =
            serde_json::to_string(&request).map_err(|e| PortalError::Request(e.to_string()))?;

        debug!("in-page {} {}", method, request.url);

        // JSON is valid JS, so the serialized request embeds directly. The
        // browser follows redirects; only the terminal status/URL come back.
        let script = format!(
            r#"(async () => {{
                const req = {payload};
                try {{
                    const headers = {{}};
                    for (const [k, v] of req.headers) headers[k] = v;
                    const init = {{
                        method: req.method,
                        headers: headers,
                        redirect: 'follow',
                        credentials: 'include'
                    }};
                    if (req.body !== null && req.body !== undefined) init.body = req.body;
                    const res = await fetch(req.url, init);
                    const text = await res.text();
                    return {{ ok: {{ status: res.status, url: res.url, body: text }} }};
                }} catch (e) {{
                    return {{ err: String(e) }};
                }}
            }})()"#
        );

        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .expect("expression is set");

        let value = tokio::time::timeout(Duration::from_secs(60), self.session_page.evaluate(params))
            .await
            .map_err(|_| PortalError::Request(format!("{} {} timed out", method, url)))?
            .map_err(|e| PortalError::Request(e.to_string()))?
            .into_value::<ShimResult>()
            .map_err(|e| PortalError::Request(format!("malformed shim result: {}", e)))?;

        match (value.ok, value.err) {
            (Some(resp), _) => Ok(resp),
            (None, Some(err)) => Err(PortalError::Request(err)),
            (None, None) => Err(PortalError::Request("empty shim result".into())),
        }
    }
}

/// One pending in-page request. Mirrors the thin builder surface the call
/// sites need: optional body and optional extra headers.
pub struct RequestBuilder<'a> {
    client: &'a PortalClient,
    method: &'a str,
    url: String,
    body: Option<&'a str>,
    headers: Vec<(String, String)>,
}

impl<'a> RequestBuilder<'a> {
    fn new(client: &'a PortalClient, method: &'a str, url: &str) -> Self {
        Self {
            client,
            method,
            url: url.to_string(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub async fn send(self) -> Result<PortalResponse, PortalError> {
        self.client
            .execute(self.method, &self.url, self.body, self.headers)
            .await
    }
}

/// Resolve a path against the fixed portal origin; absolute URLs pass through.
pub fn resolve_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    if url.starts_with('/') {
        format!("{}{}", PORTAL_ORIGIN, url)
    } else {
        format!("{}/{}", PORTAL_ORIGIN, url)
    }
}

/// Form-urlencode a set of fields for a POST body.
pub fn encode_form(fields: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in fields {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_against_the_portal() {
        assert_eq!(
            resolve_url("/dashboard"),
            "https://dash.hidencloud.com/dashboard"
        );
        assert_eq!(
            resolve_url("service/1/manage"),
            "https://dash.hidencloud.com/service/1/manage"
        );
    }

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            resolve_url("https://dash.hidencloud.com/invoice/55"),
            "https://dash.hidencloud.com/invoice/55"
        );
    }

    #[test]
    fn form_encoding_matches_expected_payment_body() {
        let fields = vec![
            ("_token".to_string(), "abc".to_string()),
            ("amount".to_string(), "10".to_string()),
        ];
        assert_eq!(encode_form(&fields), "_token=abc&amount=10");
    }

    #[test]
    fn form_encoding_escapes_reserved_characters() {
        let fields = vec![("q".to_string(), "a b&c=d".to_string())];
        assert_eq!(encode_form(&fields), "q=a+b%26c%3Dd");
    }

    #[test]
    fn shim_result_parses_both_arms() {
        let ok: ShimResult = serde_json::from_str(
            r#"{"ok": {"status": 200, "url": "https://dash.hidencloud.com/x", "body": "<html>"}}"#,
        )
        .unwrap();
        assert_eq!(ok.ok.unwrap().status, 200);

        let err: ShimResult = serde_json::from_str(r#"{"err": "TypeError: failed"}"#).unwrap();
        assert_eq!(err.err.as_deref(), Some("TypeError: failed"));
    }
}
