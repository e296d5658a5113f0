//! Fan-out fetch orchestration
//!
//! One [`FetchEngine`] instance holds the transient identity for a single
//! sync (cookies, tokens, proxy index, User-Agent, working pagination
//! variant). The fetch is strictly sequential: the upstream reads parallel
//! requests as bot behavior and answers with captcha.
//!
//! Strategy order per fetch: embedded page state from the session init,
//! then the JSON endpoints across endpoints × sort orders, then per-star
//! filtered passes to get past the upstream's per-query cap, and finally
//! the DOM fallback when everything else came back empty.

pub mod dedup;
pub mod paginator;

use std::time::{Duration, Instant};

use chrono::Utc;

use crate::captcha::CaptchaSolver;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::http_client::HttpClient;
use crate::normalizer::{dom, FetchResult};
use crate::session::SessionManager;
use crate::url_parser::{parse_organization_url, ParsedOrgUrl};

use dedup::ReviewAccumulator;
use paginator::{PaginationVariant, PassPlan, ENDPOINTS, SORT_ORDERS};

/// Global wall-clock budget for one fetch. Checked before every
/// suspension point; expiry returns whatever has accumulated.
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }
}

/// Accumulated fetch state shared across passes
pub(crate) struct FetchState {
    acc: ReviewAccumulator,
    organization_name: Option<String>,
    rating: Option<f64>,
    total: u64,
}

impl FetchState {
    fn new() -> Self {
        Self {
            acc: ReviewAccumulator::new(),
            organization_name: None,
            rating: None,
            total: 0,
        }
    }

    /// Merge one page/strategy result. Metadata fills first-wins; the
    /// reported total only ever rises.
    pub(crate) fn absorb(&mut self, result: FetchResult) -> usize {
        if self.organization_name.is_none() {
            self.organization_name = result.organization_name;
        }
        if self.rating.is_none() {
            self.rating = result.rating;
        }
        self.total = self.total.max(result.total_reviews);
        self.acc.merge(result.reviews)
    }

    pub(crate) fn fetched(&self) -> u64 {
        self.acc.len() as u64
    }

    fn into_fetch_result(self) -> FetchResult {
        FetchResult {
            organization_name: self.organization_name,
            rating: self.rating,
            total_reviews: self.total,
            reviews: self.acc.into_reviews(),
        }
    }
}

/// The review acquisition engine. One instance per sync call; batch mode
/// reuses an instance but resets the session between sources.
pub struct FetchEngine {
    pub(crate) config: EngineConfig,
    pub(crate) http: HttpClient,
    pub(crate) session: SessionManager,
    pub(crate) solver: CaptchaSolver,
    pub(crate) working_variant: Option<PaginationVariant>,
    pub(crate) deadline: Deadline,
}

impl FetchEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let http = HttpClient::new(&config);
        let solver = CaptchaSolver::new(&config);
        let deadline = Deadline::new(config.fetch_budget);
        Self {
            config,
            http,
            session: SessionManager::new(),
            solver,
            working_variant: None,
            deadline,
        }
    }

    /// Fetch the complete deduplicated review set for an organization URL.
    ///
    /// Transport-level trouble never fails the call; the worst outcome
    /// is an empty [`FetchResult`]. Only an unparseable URL is an error.
    pub async fn fetch_reviews(&mut self, url: &str) -> Result<FetchResult, EngineError> {
        let parsed = parse_organization_url(url)
            .ok_or_else(|| EngineError::InvalidUrl(url.to_string()))?;
        let base_url = self.base_url(&parsed);
        self.deadline = Deadline::new(self.config.fetch_budget);

        let mut state = FetchState::new();

        let page_url = reviews_page_url(&base_url, &parsed);
        let seeded = self
            .session
            .initialize(
                &self.http,
                &page_url,
                &parsed.org_id,
                self.config.retry_backoff,
                Utc::now(),
            )
            .await;
        let embedded_count = state.absorb(seeded);
        if embedded_count > 0 {
            log::info!("embedded page state yielded {embedded_count} reviews");
        }

        self.ensure_csrf(&base_url).await;

        'passes: for endpoint in &ENDPOINTS {
            for ranking in SORT_ORDERS {
                if self.deadline.is_timed_out() {
                    break 'passes;
                }
                if state.total > 0 && state.fetched() >= state.total {
                    break 'passes;
                }
                let plan = PassPlan {
                    base_url: &base_url,
                    org_id: &parsed.org_id,
                    endpoint,
                    ranking,
                    rating_filter: None,
                };
                self.run_pass(&mut state, &plan).await;
            }
        }

        // The upstream caps unfiltered result sets (empirically around
        // 600). Filtered queries are capped separately, so summing the
        // per-star passes approximates full coverage.
        if state.total > 0 && state.fetched() < state.total && !self.deadline.is_timed_out() {
            log::info!(
                "unfiltered passes fetched {}/{}, starting per-rating passes",
                state.fetched(),
                state.total,
            );
            for stars in 1..=5u8 {
                if self.deadline.is_timed_out() || state.fetched() >= state.total {
                    break;
                }
                // Filtered queries may accept a different paging scheme.
                self.working_variant = None;
                let plan = PassPlan {
                    base_url: &base_url,
                    org_id: &parsed.org_id,
                    endpoint: &ENDPOINTS[0],
                    ranking: "by_time",
                    rating_filter: Some(stars),
                };
                self.run_pass(&mut state, &plan).await;
                if stars < 5 && !self.config.star_pass_delay.is_zero() {
                    tokio::time::sleep(self.config.star_pass_delay).await;
                }
            }
        }

        if state.acc.is_empty() {
            if let Some(html) = self.session.cached_html() {
                let dom_result = dom::parse_dom(html, Utc::now());
                if !dom_result.is_empty() {
                    log::info!("DOM fallback yielded {} reviews", dom_result.reviews.len());
                }
                state.absorb(dom_result);
            }
        }

        let result = state.into_fetch_result();
        log::info!(
            "fetch finished: {} unique reviews, reported total {}",
            result.reviews.len(),
            result.total_reviews,
        );
        Ok(result)
    }

    /// Advance to the next outbound proxy
    pub fn rotate_proxy(&mut self) {
        self.http.rotate_proxy();
    }

    /// Drop the whole session identity: cookies, tokens, User-Agent, and
    /// the cached pagination variant. The proxy index survives.
    pub fn reset_session(&mut self) {
        self.http.reset();
        self.session.clear();
        self.working_variant = None;
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) async fn ensure_csrf(&mut self, base_url: &str) -> Option<String> {
        self.session
            .csrf_token(&self.http, base_url, self.config.retry_backoff)
            .await
    }

    fn base_url(&self, parsed: &ParsedOrgUrl) -> String {
        self.config
            .base_url_override
            .clone()
            .unwrap_or_else(|| parsed.host_tag.base_url().to_string())
    }
}

/// Canonical reviews-tab URL for an organization
fn reviews_page_url(base_url: &str, parsed: &ParsedOrgUrl) -> String {
    match &parsed.slug {
        Some(slug) => format!("{base_url}/maps/org/{slug}/{}/reviews/", parsed.org_id),
        None => format!("{base_url}/maps/org/{}/reviews/", parsed.org_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_parser::HostTag;

    #[test]
    fn deadline_expires() {
        let deadline = Deadline::new(Duration::ZERO);
        assert!(deadline.is_timed_out());
        assert_eq!(deadline.remaining(), Duration::ZERO);

        let generous = Deadline::new(Duration::from_secs(600));
        assert!(!generous.is_timed_out());
    }

    #[test]
    fn reviews_page_url_includes_slug_when_present() {
        let with_slug = ParsedOrgUrl {
            org_id: "1010501395".to_string(),
            host_tag: HostTag::Ru,
            slug: Some("kafe".to_string()),
        };
        assert_eq!(
            reviews_page_url("https://yandex.ru", &with_slug),
            "https://yandex.ru/maps/org/kafe/1010501395/reviews/"
        );

        let without_slug = ParsedOrgUrl {
            org_id: "1010501395".to_string(),
            host_tag: HostTag::Ru,
            slug: None,
        };
        assert_eq!(
            reviews_page_url("https://yandex.ru", &without_slug),
            "https://yandex.ru/maps/org/1010501395/reviews/"
        );
    }

    #[test]
    fn state_total_is_monotone() {
        let mut state = FetchState::new();
        state.absorb(FetchResult {
            total_reviews: 100,
            ..FetchResult::default()
        });
        state.absorb(FetchResult {
            total_reviews: 40,
            ..FetchResult::default()
        });
        assert_eq!(state.total, 100);
        state.absorb(FetchResult {
            total_reviews: 640,
            ..FetchResult::default()
        });
        assert_eq!(state.total, 640);
    }

    #[test]
    fn state_metadata_is_first_wins() {
        let mut state = FetchState::new();
        state.absorb(FetchResult {
            organization_name: Some("Первое имя".to_string()),
            rating: Some(4.5),
            ..FetchResult::default()
        });
        state.absorb(FetchResult {
            organization_name: Some("Второе имя".to_string()),
            rating: Some(1.0),
            ..FetchResult::default()
        });
        assert_eq!(state.organization_name.as_deref(), Some("Первое имя"));
        assert_eq!(state.rating, Some(4.5));
    }

    #[test]
    fn invalid_url_is_a_validation_error() {
        let mut engine = FetchEngine::new(EngineConfig::for_tests());
        let err = tokio::runtime::Runtime::new()
            .expect("runtime")
            .block_on(engine.fetch_reviews("not a url"))
            .expect_err("must fail");
        assert!(matches!(err, EngineError::InvalidUrl(_)));
    }
}
