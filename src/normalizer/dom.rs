//! DOM fallback extraction
//!
//! Last-resort strategy when neither the embedded state nor the JSON
//! endpoints produced reviews: parse the cached reviews page with CSS
//! selectors. Selector lists are ordered from current markup to older
//! generations; the first one that matches wins.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::author::clean_author;
use super::dates;
use super::types::{FetchResult, RawReview, ANONYMOUS_AUTHOR};

const TITLE_SELECTORS: [&str; 7] = [
    "h1.orgpage-header-view__header",
    "h1[itemprop=\"name\"]",
    ".orgpage-header-view__header-title",
    ".card-title-view__title",
    "a.orgpage-header-view__title",
    "[itemprop=\"name\"]",
    "h1",
];

const REVIEW_BLOCK_SELECTORS: [&str; 8] = [
    ".business-review-view",
    ".business-reviews-card-view__review",
    "div[itemprop=\"review\"]",
    "[data-review-id]",
    ".review-card-view",
    ".reviews-view__review",
    "li.reviews-item",
    ".review-item",
];

const AUTHOR_SELECTORS: [&str; 11] = [
    ".business-review-view__author-name span",
    ".business-review-view__author-name",
    "a.business-review-view__user-name",
    ".business-review-view__author span",
    "div.business-review-view__author-container span",
    "span[itemprop=\"name\"]",
    "[itemprop=\"name\"]",
    ".author-name",
    ".user-name",
    ".review-author",
    ".reviews-view__author",
];

const TEXT_SELECTORS: [&str; 8] = [
    ".business-review-view__body-text",
    ".business-review-view__body span",
    "[itemprop=\"reviewBody\"]",
    ".business-review-view__text",
    ".review-text",
    ".review-card-view__body",
    ".reviews-view__text",
    "p",
];

const DATE_SELECTORS: [&str; 3] = [
    ".business-review-view__date",
    ".review-date",
    ".date",
];

const FILLED_STAR_SELECTORS: [&str; 3] = [
    ".business-rating-badge-view__star._full",
    ".rating-badge__star._full",
    "span._full",
];

static ARIA_RATING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:[.,]\d+)?)\s*(?:из|/)\s*5").expect("static pattern")
});

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Parse the cached reviews page into a [`FetchResult`].
#[must_use]
pub fn parse_dom(html: &str, now: DateTime<Utc>) -> FetchResult {
    let document = Html::parse_document(html);

    let organization_name = extract_title(&document);

    let mut reviews = Vec::new();
    for css in REVIEW_BLOCK_SELECTORS {
        let sel = selector(css);
        let blocks: Vec<ElementRef> = document.select(&sel).collect();
        if blocks.is_empty() {
            continue;
        }
        for block in blocks {
            if let Some(review) = review_from_block(block, now) {
                reviews.push(review);
            }
        }
        break;
    }

    FetchResult {
        organization_name,
        rating: None,
        total_reviews: 0,
        reviews,
    }
}

fn extract_title(document: &Html) -> Option<String> {
    for css in TITLE_SELECTORS {
        let sel = selector(css);
        if let Some(element) = document.select(&sel).next() {
            let text = element_text(element);
            if (2..200).contains(&text.chars().count()) {
                return Some(text);
            }
        }
    }
    None
}

fn review_from_block(block: ElementRef, now: DateTime<Utc>) -> Option<RawReview> {
    let author_name = AUTHOR_SELECTORS
        .iter()
        .find_map(|css| {
            let sel = selector(css);
            block
                .select(&sel)
                .next()
                .map(element_text)
                .filter(|name| !name.is_empty())
        })
        .map(|name| clean_author(&name))
        .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string());

    let rating = extract_rating(block);

    let text = TEXT_SELECTORS.iter().find_map(|css| {
        let sel = selector(css);
        block
            .select(&sel)
            .map(element_text)
            .find(|t| t.chars().count() > 5)
    });

    let published_at = Some(extract_date(block, now));

    let yandex_id = block
        .value()
        .attr("data-review-id")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from);

    let review = RawReview {
        yandex_id,
        author_name,
        rating,
        text,
        branch_name: None,
        published_at,
    };
    review.is_meaningful().then_some(review)
}

/// Five strategies, tried in order, for the star rating of one block.
fn extract_rating(block: ElementRef) -> Option<u8> {
    // 1. Count of filled-star elements.
    for css in FILLED_STAR_SELECTORS {
        let sel = selector(css);
        let count = block.select(&sel).count();
        if (1..=5).contains(&count) {
            return Some(count as u8);
        }
    }

    // 2. "N из 5" / "N/5" in an aria-label or title.
    let labeled = selector("[aria-label], [title]");
    for element in block.select(&labeled) {
        let label = element
            .value()
            .attr("aria-label")
            .or_else(|| element.value().attr("title"))
            .unwrap_or_default();
        if let Some(caps) = ARIA_RATING.captures(label) {
            if let Ok(value) = caps[1].replace(',', ".").parse::<f64>() {
                let rounded = value.round();
                if (1.0..=5.0).contains(&rounded) {
                    return Some(rounded as u8);
                }
            }
        }
    }

    // 3. data-* attributes on any descendant.
    let attributed = selector("[data-value], [data-rating], [data-score]");
    for element in block.select(&attributed) {
        for attr in ["data-value", "data-rating", "data-score"] {
            if let Some(raw) = element.value().attr(attr) {
                if let Ok(value) = raw.replace(',', ".").parse::<f64>() {
                    let rounded = value.round();
                    if (1.0..=5.0).contains(&rounded) {
                        return Some(rounded as u8);
                    }
                }
            }
        }
    }

    // 4. Microdata ratingValue.
    let microdata = selector("[itemprop=\"ratingValue\"]");
    if let Some(element) = block.select(&microdata).next() {
        let raw = element
            .value()
            .attr("content")
            .map(String::from)
            .unwrap_or_else(|| element_text(element));
        if let Ok(value) = raw.trim().replace(',', ".").parse::<f64>() {
            let rounded = value.round();
            if (1.0..=5.0).contains(&rounded) {
                return Some(rounded as u8);
            }
        }
    }

    // 5. Any element with a `_full` class modifier, clamped.
    let any_full = selector("[class]");
    let count = block
        .select(&any_full)
        .filter(|element| {
            element
                .value()
                .attr("class")
                .is_some_and(|classes| classes.contains("_full"))
        })
        .count();
    if count > 0 {
        return Some(count.clamp(1, 5) as u8);
    }

    None
}

fn extract_date(block: ElementRef, now: DateTime<Utc>) -> DateTime<Utc> {
    let time_sel = selector("time[datetime]");
    if let Some(element) = block.select(&time_sel).next() {
        if let Some(raw) = element.value().attr("datetime") {
            if let Some(parsed) = dates::try_parse(raw, now) {
                return parsed;
            }
        }
    }

    let microdata = selector("[itemprop=\"datePublished\"]");
    if let Some(element) = block.select(&microdata).next() {
        let raw = element
            .value()
            .attr("content")
            .map(String::from)
            .unwrap_or_else(|| element_text(element));
        if let Some(parsed) = dates::try_parse(&raw, now) {
            return parsed;
        }
    }

    for css in DATE_SELECTORS {
        let sel = selector(css);
        if let Some(element) = block.select(&sel).next() {
            return dates::parse_russian_date(&element_text(element), now);
        }
    }

    now
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}
