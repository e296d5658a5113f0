//! Browser-like HTTP client
//!
//! Wraps `reqwest` with the identity pieces the upstream profiles: a
//! shared cookie jar, a rotating outbound proxy, and a randomized
//! User-Agent with client-hint headers that stay consistent with it.
//! Transport failures never reach the caller as errors. They degrade to
//! a logged `None` and feed the pagination stopping rules.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::cookie::Jar;

use crate::config::EngineConfig;

/// One curated browser identity. `sec_ch_ua`/`platform` are populated for
/// Chromium engines only; Firefox and Safari must not send client hints.
#[derive(Debug, Clone, Copy)]
pub struct UserAgent {
    pub value: &'static str,
    pub sec_ch_ua: Option<&'static str>,
    pub platform: Option<&'static str>,
}

impl UserAgent {
    #[must_use]
    pub fn is_chromium(&self) -> bool {
        self.sec_ch_ua.is_some()
    }
}

/// Five modern browsers, refreshed alongside upstream releases
pub const USER_AGENTS: [UserAgent; 5] = [
    UserAgent {
        value: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
        sec_ch_ua: Some("\"Chromium\";v=\"132\", \"Google Chrome\";v=\"132\", \"Not.A/Brand\";v=\"8\""),
        platform: Some("\"Windows\""),
    },
    UserAgent {
        value: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
        sec_ch_ua: Some("\"Chromium\";v=\"132\", \"Google Chrome\";v=\"132\", \"Not.A/Brand\";v=\"8\""),
        platform: Some("\"macOS\""),
    },
    UserAgent {
        value: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        sec_ch_ua: Some("\"Chromium\";v=\"131\", \"Google Chrome\";v=\"131\", \"Not.A/Brand\";v=\"24\""),
        platform: Some("\"Linux\""),
    },
    UserAgent {
        value: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:134.0) Gecko/20100101 Firefox/134.0",
        sec_ch_ua: None,
        platform: None,
    },
    UserAgent {
        value: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.2 Safari/605.1.15",
        sec_ch_ua: None,
        platform: None,
    },
];

const ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7";

/// HTTP client holding one coherent browser identity
pub struct HttpClient {
    client: reqwest::Client,
    jar: Arc<Jar>,
    user_agent: UserAgent,
    proxies: Vec<String>,
    proxy_index: usize,
    default_timeout: Duration,
}

impl HttpClient {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let jar = Arc::new(Jar::default());
        let user_agent = pick_user_agent();
        let proxies = config.proxies.clone();
        let client = build_client(&jar, proxies.first().map(String::as_str));
        Self {
            client,
            jar,
            user_agent,
            proxies,
            proxy_index: 0,
            default_timeout: config.http_timeout,
        }
    }

    /// Issue a GET. Any transport error (DNS, connect, read, non-2xx)
    /// returns `None` with a log entry.
    pub async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        extra_headers: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Option<reqwest::Response> {
        let mut request = self
            .client
            .get(url)
            .timeout(timeout.unwrap_or(self.default_timeout))
            .header("User-Agent", self.user_agent.value)
            .header("Accept-Language", ACCEPT_LANGUAGE);

        if let (Some(sec_ch_ua), Some(platform)) =
            (self.user_agent.sec_ch_ua, self.user_agent.platform)
        {
            request = request
                .header("Sec-Ch-Ua", sec_ch_ua)
                .header("Sec-Ch-Ua-Mobile", "?0")
                .header("Sec-Ch-Ua-Platform", platform);
        }

        for (name, value) in extra_headers {
            request = request.header(*name, value.as_str());
        }
        if !query.is_empty() {
            request = request.query(query);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => Some(response),
            Ok(response) => {
                log::warn!("GET {url} returned status {}", response.status());
                None
            }
            Err(err) => {
                log::warn!("GET {url} failed: {err}");
                None
            }
        }
    }

    /// Advance the round-robin proxy index and rebuild the transport.
    /// The cookie jar survives rotation; `reset` is the forgetful path.
    pub fn rotate_proxy(&mut self) {
        if self.proxies.is_empty() {
            return;
        }
        self.proxy_index = (self.proxy_index + 1) % self.proxies.len();
        log::debug!("rotating to proxy #{}", self.proxy_index);
        self.client = build_client(&self.jar, Some(self.proxies[self.proxy_index].as_str()));
    }

    /// Discard cookies and roll a fresh User-Agent. The proxy index is
    /// kept; it only advances, never rewinds.
    pub fn reset(&mut self) {
        self.jar = Arc::new(Jar::default());
        self.user_agent = pick_user_agent();
        let proxy = self
            .proxies
            .get(self.proxy_index)
            .map(String::as_str);
        self.client = build_client(&self.jar, proxy);
    }

    #[must_use]
    pub fn user_agent(&self) -> &UserAgent {
        &self.user_agent
    }

    #[must_use]
    pub fn proxy_index(&self) -> usize {
        self.proxy_index
    }
}

fn pick_user_agent() -> UserAgent {
    *USER_AGENTS
        .choose(&mut rand::rng())
        .unwrap_or(&USER_AGENTS[0])
}

fn build_client(jar: &Arc<Jar>, proxy: Option<&str>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .cookie_provider(Arc::clone(jar))
        .redirect(reqwest::redirect::Policy::limited(5));

    if let Some(proxy_url) = proxy {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(err) => log::warn!("ignoring invalid proxy {proxy_url}: {err}"),
        }
    }

    builder.build().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chromium_agents_carry_consistent_hints() {
        for agent in &USER_AGENTS {
            if agent.value.contains("Chrome/") {
                assert!(agent.is_chromium(), "chromium UA without hints: {}", agent.value);
                let platform = agent.platform.expect("platform hint");
                if agent.value.contains("Windows") {
                    assert_eq!(platform, "\"Windows\"");
                } else if agent.value.contains("Mac OS X") {
                    assert_eq!(platform, "\"macOS\"");
                } else {
                    assert_eq!(platform, "\"Linux\"");
                }
            } else {
                assert!(agent.sec_ch_ua.is_none(), "non-chromium UA with hints: {}", agent.value);
                assert!(agent.platform.is_none());
            }
        }
    }

    #[test]
    fn five_distinct_agents() {
        let mut values: Vec<&str> = USER_AGENTS.iter().map(|ua| ua.value).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn proxy_rotation_is_round_robin() {
        let config = EngineConfig {
            proxies: vec![
                "http://proxy-a:8080".to_string(),
                "http://proxy-b:8080".to_string(),
                "http://proxy-c:8080".to_string(),
            ],
            ..EngineConfig::default()
        };
        let mut client = HttpClient::new(&config);
        assert_eq!(client.proxy_index(), 0);
        client.rotate_proxy();
        assert_eq!(client.proxy_index(), 1);
        client.rotate_proxy();
        client.rotate_proxy();
        assert_eq!(client.proxy_index(), 0);
    }

    #[test]
    fn rotation_without_proxies_is_a_no_op() {
        let mut client = HttpClient::new(&EngineConfig::default());
        client.rotate_proxy();
        assert_eq!(client.proxy_index(), 0);
    }

    #[test]
    fn reset_keeps_proxy_index() {
        let config = EngineConfig {
            proxies: vec!["http://proxy-a:8080".to_string(), "http://proxy-b:8080".to_string()],
            ..EngineConfig::default()
        };
        let mut client = HttpClient::new(&config);
        client.rotate_proxy();
        client.reset();
        assert_eq!(client.proxy_index(), 1);
    }
}
