//! Engine configuration
//!
//! Runtime knobs for the acquisition engine. Production values come from
//! the environment (`YANDEX_PROXIES`, `CAPTCHA_API_KEY`, `CAPTCHA_API_URL`);
//! the timing fields exist so tests can collapse the inter-page and
//! back-off delays instead of sleeping through them.

use std::time::Duration;

/// Default captcha solving service
pub const DEFAULT_CAPTCHA_API_URL: &str = "https://rucaptcha.com";

/// Global budget for one `fetch_reviews` call
pub const DEFAULT_FETCH_BUDGET: Duration = Duration::from_secs(480);

/// Default per-request HTTP timeout
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Configuration for the acquisition engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Outbound proxy URLs, rotated round-robin. Empty disables proxying.
    pub proxies: Vec<String>,
    /// Anti-captcha service API key. Absent key makes captcha handling
    /// fail immediately.
    pub captcha_api_key: Option<String>,
    /// Anti-captcha service base URL
    pub captcha_api_url: String,
    /// Overrides the upstream scheme+host derived from the source URL.
    /// Used by tests to point the engine at a local mock server.
    pub base_url_override: Option<String>,
    /// Wall-clock budget for one full fetch
    pub fetch_budget: Duration,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Pause between consecutive pages of one pass
    pub page_delay: Duration,
    /// Pause between per-star filtered passes
    pub star_pass_delay: Duration,
    /// Base unit for session-init back-off (attempt N sleeps N units)
    pub retry_backoff: Duration,
    /// Poll interval against the captcha solver
    pub captcha_poll_interval: Duration,
    /// Upper bound for one captcha solving attempt (further capped by the
    /// remaining global budget)
    pub captcha_poll_budget: Duration,
    /// Pause after a failed captcha attempt before retrying the page
    pub captcha_retry_delay: Duration,
    /// Pause between sources during a batch sync
    pub batch_source_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            captcha_api_key: None,
            captcha_api_url: DEFAULT_CAPTCHA_API_URL.to_string(),
            base_url_override: None,
            fetch_budget: DEFAULT_FETCH_BUDGET,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            page_delay: Duration::from_millis(500),
            star_pass_delay: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(1),
            captcha_poll_interval: Duration::from_secs(5),
            captcha_poll_budget: Duration::from_secs(120),
            captcha_retry_delay: Duration::from_secs(5),
            batch_source_delay: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the process environment.
    ///
    /// Unset variables fall back to defaults; `YANDEX_PROXIES` is a
    /// comma-separated list with empty entries ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("YANDEX_PROXIES") {
            config.proxies = parse_proxy_list(&raw);
        }
        if let Ok(key) = std::env::var("CAPTCHA_API_KEY") {
            if !key.trim().is_empty() {
                config.captcha_api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(api_url) = std::env::var("CAPTCHA_API_URL") {
            if !api_url.trim().is_empty() {
                config.captcha_api_url = api_url.trim().trim_end_matches('/').to_string();
            }
        }

        config
    }

    /// Configuration with all inter-request delays collapsed to zero.
    /// Intended for tests driving a local mock upstream.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            page_delay: Duration::ZERO,
            star_pass_delay: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            captcha_poll_interval: Duration::from_millis(10),
            captcha_poll_budget: Duration::from_secs(2),
            captcha_retry_delay: Duration::ZERO,
            batch_source_delay: Duration::ZERO,
            http_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

/// Split a comma-separated proxy list, dropping empty entries
fn parse_proxy_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert!(config.proxies.is_empty());
        assert_eq!(config.captcha_api_url, DEFAULT_CAPTCHA_API_URL);
        assert_eq!(config.fetch_budget, Duration::from_secs(480));
        assert_eq!(config.http_timeout, Duration::from_secs(20));
        assert_eq!(config.page_delay, Duration::from_millis(500));
        assert_eq!(config.star_pass_delay, Duration::from_secs(2));
    }

    #[test]
    fn proxy_list_parsing_skips_empty_entries() {
        let proxies = parse_proxy_list("http://proxy1:8080, socks5://proxy2:1080,,  ");
        assert_eq!(proxies, vec!["http://proxy1:8080", "socks5://proxy2:1080"]);
        assert!(parse_proxy_list("").is_empty());
    }
}
