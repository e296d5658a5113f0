//! Anti-bot challenge handling
//!
//! When a JSON response carries a captcha flag, the challenge is shipped
//! to an external solving service and the token is polled back within a
//! bounded slice of the global fetch budget. Solving is best-effort: any
//! solver failure, missing key included, degrades to `None` and the
//! orchestrator falls back to proxy rotation.

use std::time::Duration;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::engine::Deadline;

/// One detected challenge, ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    pub sitekey: String,
    pub captcha_type: Option<String>,
    pub page_url: String,
}

impl CaptchaChallenge {
    /// Solver method: `yandex` for SmartCaptcha, `userrecaptcha` otherwise
    #[must_use]
    pub fn solver_method(&self) -> &'static str {
        let type_says_smart = self.captcha_type.as_deref().is_some_and(|t| {
            t.contains("smart") || matches!(t, "smartCaptcha" | "smart_captcha" | "smart")
        });
        if type_says_smart || self.page_url.contains("yandex") {
            "yandex"
        } else {
            "userrecaptcha"
        }
    }
}

/// Inspect a payload for a captcha flag and pull out the sitekey.
#[must_use]
pub fn detect_challenge(payload: &Value, page_url: &str) -> Option<CaptchaChallenge> {
    let obj = payload.as_object()?;

    let required = obj.get("captchaRequired").and_then(Value::as_bool) == Some(true)
        || obj.get("type").and_then(Value::as_str) == Some("captcha");
    if !required {
        return None;
    }

    let sitekey = sitekey_from(obj)
        .or_else(|| obj.get("captcha").and_then(Value::as_object).and_then(sitekey_from))?;

    let captcha_type = obj
        .get("captchaType")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str)
        .map(String::from);

    Some(CaptchaChallenge {
        sitekey,
        captcha_type,
        page_url: page_url.to_string(),
    })
}

fn sitekey_from(obj: &serde_json::Map<String, Value>) -> Option<String> {
    ["key", "sitekey", "captchaKey", "data-sitekey"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(String::from)
}

/// Client for a rucaptcha-compatible solving service
pub struct CaptchaSolver {
    api_key: Option<String>,
    api_url: String,
    poll_interval: Duration,
    poll_budget: Duration,
    client: reqwest::Client,
}

impl CaptchaSolver {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_key: config.captcha_api_key.clone(),
            api_url: config.captcha_api_url.trim_end_matches('/').to_string(),
            poll_interval: config.captcha_poll_interval,
            poll_budget: config.captcha_poll_budget,
            client: reqwest::Client::new(),
        }
    }

    /// Submit the challenge and poll for the token.
    ///
    /// The poll budget is `min(configured budget, remaining global
    /// budget)`; expiry returns `None` like any other solver failure.
    pub async fn solve(&self, challenge: &CaptchaChallenge, deadline: &Deadline) -> Option<String> {
        let Some(api_key) = &self.api_key else {
            log::warn!("captcha required but no CAPTCHA_API_KEY configured");
            return None;
        };

        let method = challenge.solver_method();
        let key_param = if method == "yandex" { "sitekey" } else { "googlekey" };

        let submit_url = format!("{}/in.php", self.api_url);
        let form = [
            ("key", api_key.as_str()),
            ("method", method),
            (key_param, challenge.sitekey.as_str()),
            ("pageurl", challenge.page_url.as_str()),
            ("json", "1"),
        ];

        let submitted = self
            .client
            .post(&submit_url)
            .form(&form)
            .timeout(Duration::from_secs(30))
            .send()
            .await;
        let envelope: SolverEnvelope = match submitted {
            Ok(response) => response.json().await.ok()?,
            Err(err) => {
                log::warn!("captcha submit failed: {err}");
                return None;
            }
        };
        if envelope.status != 1 {
            log::warn!("captcha solver rejected task: {}", envelope.request);
            return None;
        }
        let task_id = envelope.request;

        let budget = self.poll_budget.min(deadline.remaining());
        let poll_started = std::time::Instant::now();
        let poll_url = format!("{}/res.php", self.api_url);

        while poll_started.elapsed() < budget && !deadline.is_timed_out() {
            tokio::time::sleep(self.poll_interval).await;

            let polled = self
                .client
                .get(&poll_url)
                .query(&[
                    ("key", api_key.as_str()),
                    ("action", "get"),
                    ("id", task_id.as_str()),
                    ("json", "1"),
                ])
                .timeout(Duration::from_secs(30))
                .send()
                .await;
            let envelope: SolverEnvelope = match polled {
                Ok(response) => match response.json().await {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        log::warn!("captcha poll body unreadable: {err}");
                        return None;
                    }
                },
                Err(err) => {
                    log::warn!("captcha poll failed: {err}");
                    return None;
                }
            };

            if envelope.status == 1 {
                log::info!("captcha solved for {}", challenge.page_url);
                return Some(envelope.request);
            }
            if envelope.request != "CAPCHA_NOT_READY" {
                log::warn!("captcha solver error: {}", envelope.request);
                return None;
            }
        }

        log::warn!("captcha poll budget exhausted");
        None
    }
}

/// `{status: 0|1, request: task-id | token | error-code}`
#[derive(Debug, serde::Deserialize)]
struct SolverEnvelope {
    status: i32,
    request: String,
}
