//! Page walking for one (endpoint, sort, rating-filter) pass
//!
//! Pagination against the internal endpoints is an unstable contract:
//! endpoints disagree on parameter names, indexing base, and when they
//! stop returning data. The walker probes three parameter variants,
//! caches the one that answers, and applies ordered stopping rules so a
//! degraded endpoint cannot stall the whole fetch.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use super::{FetchEngine, FetchState};
use crate::captcha::{self, CaptchaChallenge};
use crate::normalizer::json::parse_endpoint_response;
use crate::normalizer::FetchResult;
use crate::signer::sign_params;

/// Reviews requested per page
pub const PAGE_SIZE: u32 = 50;
/// Hard page ceiling per pass
pub const MAX_PAGES: u32 = 22;
/// Null pages allowed while no variant has ever answered
pub const MAX_RETRIES: u32 = 3;
/// Captcha retries allowed per pass
pub const CAPTCHA_MAX_RETRIES: u32 = 5;

/// One internal review endpoint. The widget endpoint names the org
/// parameter differently.
#[derive(Debug)]
pub struct Endpoint {
    pub path: &'static str,
    pub org_param: &'static str,
}

/// Endpoints tried in order against the active host
pub static ENDPOINTS: [Endpoint; 3] = [
    Endpoint {
        path: "/maps/api/business/fetchReviews",
        org_param: "businessId",
    },
    Endpoint {
        path: "/maps/api/business/getBusinessReviews",
        org_param: "businessId",
    },
    Endpoint {
        path: "/maps-reviews-widget/fetchReviews",
        org_param: "oid",
    },
];

/// Upstream sort orders; each exposes a partially overlapping subset
pub const SORT_ORDERS: [&str; 3] = ["by_time", "by_rating", "by_relevance"];

/// Pagination parameter schemes, probed in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationVariant {
    /// `page` (1-based) + `pageSize`
    PageOneBased,
    /// `page` (0-based) + `pageSize`
    PageZeroBased,
    /// `offset` + `limit`
    OffsetLimit,
}

pub const PAGINATION_VARIANTS: [PaginationVariant; 3] = [
    PaginationVariant::PageOneBased,
    PaginationVariant::PageZeroBased,
    PaginationVariant::OffsetLimit,
];

/// Everything fixed for the duration of one pass
pub(crate) struct PassPlan<'a> {
    pub base_url: &'a str,
    pub org_id: &'a str,
    pub endpoint: &'static Endpoint,
    pub ranking: &'static str,
    pub rating_filter: Option<u8>,
}

impl PassPlan<'_> {
    /// Reviews-page URL: referer for XHR calls and pageurl for the solver
    fn page_url(&self) -> String {
        format!("{}/maps/org/{}/reviews/", self.base_url, self.org_id)
    }
}

enum PageOutcome {
    /// Transport failure or unparseable body on every tried variant
    Null,
    Captcha(CaptchaChallenge),
    Parsed(FetchResult),
}

impl FetchEngine {
    /// Walk pages for one pass, merging into `state` until a stopping
    /// rule fires.
    pub(crate) async fn run_pass(&mut self, state: &mut FetchState, plan: &PassPlan<'_>) {
        let mut page: u32 = 1;
        let mut consecutive_nulls: u32 = 0;
        let mut consecutive_empty: u32 = 0;
        let mut consecutive_dupes: u32 = 0;
        let mut captcha_retries: u32 = 0;
        let mut captcha_answer: Option<String> = None;

        log::debug!(
            "pass start: {} ranking={} rating={:?}",
            plan.endpoint.path,
            plan.ranking,
            plan.rating_filter,
        );

        loop {
            if self.deadline.is_timed_out() {
                log::warn!("fetch budget exhausted mid-pass, returning accumulator");
                break;
            }
            if page > MAX_PAGES {
                break;
            }

            match self.fetch_page(plan, page, captcha_answer.as_deref()).await {
                PageOutcome::Null => {
                    consecutive_nulls += 1;
                    let tolerance = if state.fetched() < state.total { 4 } else { 2 };
                    if consecutive_nulls >= tolerance {
                        break;
                    }
                    // An endpoint that never produced JSON is not going
                    // to start on a later page.
                    if self.working_variant.is_none() && page >= MAX_RETRIES {
                        break;
                    }
                    page += 1;
                }
                PageOutcome::Captcha(challenge) => {
                    captcha_retries += 1;
                    if captcha_retries > CAPTCHA_MAX_RETRIES {
                        log::warn!("giving up on pass after {CAPTCHA_MAX_RETRIES} captcha retries");
                        break;
                    }
                    match self.solver.solve(&challenge, &self.deadline).await {
                        Some(token) => {
                            captcha_answer = Some(token);
                        }
                        None => {
                            self.rotate_proxy();
                            self.reset_session();
                            tokio::time::sleep(self.config.captcha_retry_delay).await;
                            self.ensure_csrf(plan.base_url).await;
                            captcha_answer = None;
                        }
                    }
                    // Same page, straight away.
                    continue;
                }
                PageOutcome::Parsed(result) => {
                    captcha_answer = None;
                    let page_count = result.reviews.len() as u32;
                    let added = state.absorb(result);
                    consecutive_nulls = 0;

                    if page_count == 0 {
                        consecutive_empty += 1;
                        let tolerance = if state.fetched() < state.total { 4 } else { 2 };
                        if consecutive_empty >= tolerance {
                            break;
                        }
                    } else {
                        consecutive_empty = 0;
                        if added == 0 {
                            consecutive_dupes += 1;
                            let tolerance = if state.fetched() < state.total { 3 } else { 2 };
                            if consecutive_dupes >= tolerance {
                                break;
                            }
                        } else {
                            consecutive_dupes = 0;
                        }
                    }

                    if state.total > 0 && state.fetched() >= state.total {
                        break;
                    }
                    if page_count < PAGE_SIZE
                        && (state.total == 0 || state.fetched() >= state.total)
                    {
                        break;
                    }
                    page += 1;
                }
            }

            if !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        log::debug!(
            "pass done: {} ranking={} rating={:?} fetched={} total={}",
            plan.endpoint.path,
            plan.ranking,
            plan.rating_filter,
            state.fetched(),
            state.total,
        );
    }

    /// Fetch one page. Probes pagination variants until one produces a
    /// JSON body, then sticks with it for the rest of the pass.
    async fn fetch_page(
        &mut self,
        plan: &PassPlan<'_>,
        page: u32,
        captcha_answer: Option<&str>,
    ) -> PageOutcome {
        let url = format!("{}{}", plan.base_url, plan.endpoint.path);
        let headers = xhr_headers(plan.base_url, &plan.page_url());

        let variants: Vec<PaginationVariant> = match self.working_variant {
            Some(variant) => vec![variant],
            None => PAGINATION_VARIANTS.to_vec(),
        };

        for variant in variants {
            if self.deadline.is_timed_out() {
                return PageOutcome::Null;
            }

            let params = self.build_params(plan, page, variant, captcha_answer);
            let Some(response) = self
                .http
                .get(&url, &params, &headers, Some(Duration::from_secs(30)))
                .await
            else {
                continue;
            };
            let Ok(body) = response.text().await else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(&body) else {
                log::debug!("variant {variant:?} returned non-JSON body");
                continue;
            };

            self.working_variant = Some(variant);
            if let Some(challenge) = captcha::detect_challenge(&value, &plan.page_url()) {
                return PageOutcome::Captcha(challenge);
            }
            return PageOutcome::Parsed(parse_endpoint_response(&value, Utc::now()));
        }

        PageOutcome::Null
    }

    /// Assemble the query for one page request. The signature `s` covers
    /// every other parameter and must be computed last.
    fn build_params(
        &self,
        plan: &PassPlan<'_>,
        page: u32,
        variant: PaginationVariant,
        captcha_answer: Option<&str>,
    ) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("ajax".to_string(), "1".to_string()),
            (plan.endpoint.org_param.to_string(), plan.org_id.to_string()),
        ];
        if let Some(csrf) = self.session.cached_csrf() {
            params.push(("csrfToken".to_string(), csrf.to_string()));
        }
        params.push(("locale".to_string(), "ru_RU".to_string()));
        params.push(("ranking".to_string(), plan.ranking.to_string()));
        if let Some(stars) = plan.rating_filter {
            params.push(("rating".to_string(), stars.to_string()));
        }
        if let Some(session_id) = self.session.session_id() {
            params.push(("sessionId".to_string(), session_id.to_string()));
        }
        if let Some(req_id) = self.session.req_id() {
            params.push(("reqId".to_string(), req_id.to_string()));
        }

        match variant {
            PaginationVariant::PageOneBased => {
                params.push(("page".to_string(), page.to_string()));
                params.push(("pageSize".to_string(), PAGE_SIZE.to_string()));
            }
            PaginationVariant::PageZeroBased => {
                params.push(("page".to_string(), (page - 1).to_string()));
                params.push(("pageSize".to_string(), PAGE_SIZE.to_string()));
            }
            PaginationVariant::OffsetLimit => {
                params.push(("offset".to_string(), ((page - 1) * PAGE_SIZE).to_string()));
                params.push(("limit".to_string(), PAGE_SIZE.to_string()));
            }
        }

        if let Some(answer) = captcha_answer {
            params.push(("captchaAnswer".to_string(), answer.to_string()));
        }

        let signature = sign_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        params.push(("s".to_string(), signature));
        params
    }
}

/// Headers for the internal JSON endpoints, shaped like a same-origin XHR
fn xhr_headers(base_url: &str, referer: &str) -> Vec<(&'static str, String)> {
    vec![
        ("Accept", "application/json, text/javascript, */*; q=0.01".to_string()),
        ("X-Requested-With", "XMLHttpRequest".to_string()),
        ("Sec-Fetch-Dest", "empty".to_string()),
        ("Sec-Fetch-Mode", "cors".to_string()),
        ("Sec-Fetch-Site", "same-origin".to_string()),
        ("Referer", referer.to_string()),
        ("Origin", base_url.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> FetchEngine {
        FetchEngine::new(EngineConfig::for_tests())
    }

    fn plan<'a>(endpoint: &'static Endpoint) -> PassPlan<'a> {
        PassPlan {
            base_url: "https://yandex.ru",
            org_id: "1010501395",
            endpoint,
            ranking: "by_time",
            rating_filter: None,
        }
    }

    #[test]
    fn signature_is_last_parameter() {
        let engine = engine();
        let params = engine.build_params(&plan(&ENDPOINTS[0]), 1, PaginationVariant::PageOneBased, None);
        assert_eq!(params.last().map(|(k, _)| k.as_str()), Some("s"));
        // And it equals the signature over everything before it.
        let expected = sign_params(
            params[..params.len() - 1]
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        assert_eq!(params.last().map(|(_, v)| v.as_str()), Some(expected.as_str()));
    }

    #[test]
    fn widget_endpoint_uses_oid() {
        let engine = engine();
        let params = engine.build_params(&plan(&ENDPOINTS[2]), 1, PaginationVariant::PageOneBased, None);
        assert!(params.iter().any(|(k, v)| k == "oid" && v == "1010501395"));
        assert!(!params.iter().any(|(k, _)| k == "businessId"));
    }

    #[test]
    fn variants_build_distinct_paging_params() {
        let engine = engine();
        let one_based = engine.build_params(&plan(&ENDPOINTS[0]), 3, PaginationVariant::PageOneBased, None);
        assert!(one_based.iter().any(|(k, v)| k == "page" && v == "3"));

        let zero_based = engine.build_params(&plan(&ENDPOINTS[0]), 3, PaginationVariant::PageZeroBased, None);
        assert!(zero_based.iter().any(|(k, v)| k == "page" && v == "2"));

        let offset = engine.build_params(&plan(&ENDPOINTS[0]), 3, PaginationVariant::OffsetLimit, None);
        assert!(offset.iter().any(|(k, v)| k == "offset" && v == "100"));
        assert!(offset.iter().any(|(k, v)| k == "limit" && v == "50"));
    }

    #[test]
    fn rating_filter_and_captcha_answer_are_included() {
        let engine = engine();
        let mut with_filter = plan(&ENDPOINTS[0]);
        with_filter.rating_filter = Some(4);
        let params = engine.build_params(&with_filter, 1, PaginationVariant::PageOneBased, Some("TKN"));
        assert!(params.iter().any(|(k, v)| k == "rating" && v == "4"));
        assert!(params.iter().any(|(k, v)| k == "captchaAnswer" && v == "TKN"));
    }

    #[test]
    fn endpoint_order_matches_upstream_preference() {
        assert_eq!(ENDPOINTS[0].path, "/maps/api/business/fetchReviews");
        assert_eq!(ENDPOINTS[1].path, "/maps/api/business/getBusinessReviews");
        assert_eq!(ENDPOINTS[2].path, "/maps-reviews-widget/fetchReviews");
        assert_eq!(SORT_ORDERS, ["by_time", "by_rating", "by_relevance"]);
    }
}
