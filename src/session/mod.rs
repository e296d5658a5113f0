//! Upstream session bootstrap
//!
//! One session = the ensemble the upstream sees as a coherent visitor:
//! cookies (held by the HTTP client), CSRF token, session id, request id,
//! and the cached reviews-page HTML. Tokens are pulled out of the page
//! with candidate regex lists. The upstream has shipped several layouts
//! and it is unknown which are deprecated, so every pattern stays until
//! evidence justifies removal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::http_client::HttpClient;
use crate::normalizer::{embedded, FetchResult};

/// Attempts for the initial page GET and the CSRF refresh
const MAX_ATTEMPTS: u32 = 3;

static CSRF_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#""csrfToken"\s*:\s*"([^"]+)""#,
        r#""csrf"\s*:\s*"([^"]+)""#,
        r#"data-csrf(?:-token)?="([^"]+)""#,
        r"csrfToken=([A-Za-z0-9%:._-]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static pattern"))
    .collect()
});

static SESSION_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#""sessionId"\s*:\s*"([^"]+)""#,
        r#""session_id"\s*:\s*"([^"]+)""#,
        r"sessionId=([A-Za-z0-9_.-]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static pattern"))
    .collect()
});

static REQ_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#""reqId"\s*:\s*"([^"]+)""#,
        r#""requestId"\s*:\s*"([^"]+)""#,
        r"reqId=([A-Za-z0-9%_./-]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static pattern"))
    .collect()
});

/// Headers for a top-level navigation, as a browser would send them
fn navigation_headers() -> Vec<(&'static str, String)> {
    vec![
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                .to_string(),
        ),
        ("Sec-Fetch-Dest", "document".to_string()),
        ("Sec-Fetch-Mode", "navigate".to_string()),
        ("Sec-Fetch-Site", "none".to_string()),
        ("Sec-Fetch-User", "?1".to_string()),
        ("Upgrade-Insecure-Requests", "1".to_string()),
    ]
}

/// Per-call session state. Cleared between sources and after captcha.
#[derive(Debug, Default)]
pub struct SessionManager {
    csrf_token: Option<String>,
    session_id: Option<String>,
    req_id: Option<String>,
    page_html: Option<String>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// GET the reviews page, populate the cookie jar, extract tokens, and
    /// hand the HTML to the embedded-state normalizer.
    ///
    /// Up to three attempts with 1-unit, 2-unit back-off. A dead page is
    /// not fatal: the JSON endpoints may still answer.
    pub async fn initialize(
        &mut self,
        http: &HttpClient,
        page_url: &str,
        org_id: &str,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> FetchResult {
        for attempt in 1..=MAX_ATTEMPTS {
            let response = http.get(page_url, &[], &navigation_headers(), None).await;
            if let Some(response) = response {
                match response.text().await {
                    Ok(html) => {
                        self.extract_tokens(&html);
                        let result = embedded::parse_embedded(&html, org_id, now);
                        self.page_html = Some(html);
                        log::debug!(
                            "session initialized: csrf={} sessionId={} reqId={} embedded_reviews={}",
                            self.csrf_token.is_some(),
                            self.session_id.is_some(),
                            self.req_id.is_some(),
                            result.reviews.len(),
                        );
                        return result;
                    }
                    Err(err) => log::warn!("reviews page body read failed: {err}"),
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff * attempt).await;
            }
        }
        log::warn!("session init failed after {MAX_ATTEMPTS} attempts: {page_url}");
        FetchResult::default()
    }

    /// Cached CSRF token, or a refresh via `/maps/api/csrf-token`.
    /// Accepts a bare token body or a `{token}`/`{csrfToken}` object.
    pub async fn csrf_token(
        &mut self,
        http: &HttpClient,
        base_url: &str,
        backoff: Duration,
    ) -> Option<String> {
        if let Some(token) = &self.csrf_token {
            return Some(token.clone());
        }

        let url = format!("{base_url}/maps/api/csrf-token");
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(response) = http.get(&url, &[], &[], None).await {
                if let Ok(body) = response.text().await {
                    if let Some(token) = parse_csrf_body(&body) {
                        self.csrf_token = Some(token.clone());
                        return Some(token);
                    }
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff * attempt).await;
            }
        }
        log::warn!("csrf token refresh failed");
        None
    }

    /// Wipe every piece of session state. The caller resets the HTTP
    /// client (cookies, UA) alongside.
    pub fn clear(&mut self) {
        self.csrf_token = None;
        self.session_id = None;
        self.req_id = None;
        self.page_html = None;
    }

    /// Token already in hand, without a refresh round-trip
    #[must_use]
    pub fn cached_csrf(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn req_id(&self) -> Option<&str> {
        self.req_id.as_deref()
    }

    #[must_use]
    pub fn cached_html(&self) -> Option<&str> {
        self.page_html.as_deref()
    }

    fn extract_tokens(&mut self, html: &str) {
        self.csrf_token = first_capture(&CSRF_PATTERNS, html);
        self.session_id = first_capture(&SESSION_ID_PATTERNS, html);
        self.req_id = first_capture(&REQ_ID_PATTERNS, html);
    }
}

fn first_capture(patterns: &[Regex], haystack: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(haystack)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn parse_csrf_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
        return ["token", "csrfToken"]
            .iter()
            .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
            .map(String::from);
    }
    // Bare token body: single line, no markup.
    (trimmed.len() < 512 && !trimmed.contains(char::is_whitespace) && !trimmed.contains('<'))
        .then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_from_json_assignment() {
        let mut session = SessionManager::new();
        session.extract_tokens(r#"{"csrfToken":"abc:123","sessionId":"s-77","reqId":"r/9"}"#);
        assert_eq!(session.csrf_token.as_deref(), Some("abc:123"));
        assert_eq!(session.session_id(), Some("s-77"));
        assert_eq!(session.req_id(), Some("r/9"));
    }

    #[test]
    fn csrf_from_attribute_fallback() {
        let mut session = SessionManager::new();
        session.extract_tokens(r#"<body data-csrf="tok-55"><script src="x?csrfToken=zzz"></script>"#);
        assert_eq!(session.csrf_token.as_deref(), Some("tok-55"));
    }

    #[test]
    fn first_matching_pattern_wins() {
        let mut session = SessionManager::new();
        session.extract_tokens(r#"csrfToken=second "csrfToken":"first""#);
        assert_eq!(session.csrf_token.as_deref(), Some("first"));
    }

    #[test]
    fn clear_wipes_everything() {
        let mut session = SessionManager::new();
        session.extract_tokens(r#""csrfToken":"x","sessionId":"y","reqId":"z""#);
        session.clear();
        assert!(session.csrf_token.is_none());
        assert!(session.session_id().is_none());
        assert!(session.req_id().is_none());
        assert!(session.cached_html().is_none());
    }

    #[test]
    fn csrf_body_accepts_bare_and_json() {
        assert_eq!(parse_csrf_body("tok123"), Some("tok123".to_string()));
        assert_eq!(
            parse_csrf_body(r#"{"token":"from-json"}"#),
            Some("from-json".to_string())
        );
        assert_eq!(
            parse_csrf_body(r#"{"csrfToken":"other"}"#),
            Some("other".to_string())
        );
        assert_eq!(parse_csrf_body("<html>error</html>"), None);
        assert_eq!(parse_csrf_body(""), None);
    }
}
