//! JSON endpoint payload normalization
//!
//! The internal endpoints answer in several shapes depending on endpoint
//! and upstream build. Extraction works over a dynamic `serde_json::Value`
//! with path lists plus a bounded depth-first rescue scan, never static
//! payload types.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::author::clean_author;
use super::dates::parse_date_value;
use super::types::{is_review_array, FetchResult, RawReview, ANONYMOUS_AUTHOR};

/// Dot-separated paths tried, in order, for the review array
const REVIEW_ARRAY_PATHS: [&str; 15] = [
    "reviews",
    "items",
    "comments",
    "businessReviews",
    "data.reviews",
    "data.items",
    "data.comments",
    "data.businessReviews",
    "result.reviews",
    "result.items",
    "result.comments",
    "response.reviews",
    "response.items",
    "response.comments",
    "data",
];

/// Keys carrying a total review count. The ambiguous `count` is excluded:
/// it frequently equals the page size.
const TOTAL_KEYS: [&str; 6] = [
    "totalCount",
    "reviewCount",
    "totalReviews",
    "reviewsCount",
    "ratingCount",
    "total",
];

/// Containers scanned for the full [`TOTAL_KEYS`] list. The pagination
/// object is handled separately: only its `total` is trusted, the rest
/// of its fields carry page-level semantics.
const TOTAL_CONTAINERS: [&str; 3] = ["pager", "data", "meta"];

const DATE_KEYS: [&str; 12] = [
    "updatedTime",
    "time",
    "date",
    "createdTime",
    "publishedTime",
    "created",
    "updated",
    "datePublished",
    "createdAt",
    "publishedAt",
    "dateCreated",
    "timestamp",
];

/// Maximum depth for the rescue scans over unknown payload layouts
const DEEP_SCAN_DEPTH: usize = 6;

/// Normalize one JSON endpoint response into a [`FetchResult`].
#[must_use]
pub fn parse_endpoint_response(payload: &Value, now: DateTime<Utc>) -> FetchResult {
    let reviews = find_review_array(payload)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| review_from_value(item, now))
                .collect()
        })
        .unwrap_or_default();

    FetchResult {
        organization_name: extract_organization_name(payload),
        rating: extract_organization_rating(payload),
        total_reviews: extract_total_count(payload),
        reviews,
    }
}

/// Locate the review array: known paths first, then a bounded DFS for any
/// nonempty array whose first element is review-shaped.
pub(crate) fn find_review_array(payload: &Value) -> Option<&Vec<Value>> {
    for path in REVIEW_ARRAY_PATHS {
        if let Some(items) = get_path(payload, path).and_then(Value::as_array) {
            if !items.is_empty() && is_review_array(items) {
                return Some(items);
            }
        }
    }
    deep_find_review_array(payload, DEEP_SCAN_DEPTH)
}

fn deep_find_review_array(value: &Value, depth: usize) -> Option<&Vec<Value>> {
    if depth == 0 {
        return None;
    }
    match value {
        Value::Array(items) => {
            if !items.is_empty() && is_review_array(items) {
                return Some(items);
            }
            items
                .iter()
                .find_map(|item| deep_find_review_array(item, depth - 1))
        }
        Value::Object(map) => map
            .values()
            .find_map(|child| deep_find_review_array(child, depth - 1)),
        _ => None,
    }
}

/// Build a [`RawReview`] from one review-shaped object. Returns `None`
/// when nothing meaningful could be extracted.
pub(crate) fn review_from_value(item: &Value, now: DateTime<Utc>) -> Option<RawReview> {
    let obj = item.as_object()?;

    let author_raw = get_str_at(item, "author.name")
        .or_else(|| get_str_at(item, "author.displayName"))
        .or_else(|| get_str_at(item, "author.publicName"))
        .or_else(|| get_str_at(item, "author.login"))
        .or_else(|| obj.get("author").and_then(Value::as_str))
        .or_else(|| obj.get("authorName").and_then(Value::as_str))
        .or_else(|| obj.get("userName").and_then(Value::as_str))
        .or_else(|| obj.get("displayName").and_then(Value::as_str));
    let author_name = author_raw
        .map(clean_author)
        .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string());

    let rating = obj
        .get("rating")
        .and_then(review_rating_from_value)
        .or_else(|| obj.get("stars").and_then(review_rating_from_value))
        .or_else(|| obj.get("score").and_then(review_rating_from_value))
        .or_else(|| obj.get("mark").and_then(review_rating_from_value))
        .or_else(|| obj.get("value").and_then(review_rating_from_value));

    let text = ["text", "comment", "body", "reviewBody"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);

    let branch_name = ["businessName", "branchName", "orgName"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(String::from);

    let published_at = DATE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(|v| parse_date_value(v, now)));

    let yandex_id = obj
        .get("reviewId")
        .or_else(|| obj.get("id"))
        .and_then(id_to_string);

    let review = RawReview {
        yandex_id,
        author_name,
        rating,
        text,
        branch_name,
        published_at,
    };
    review.is_meaningful().then_some(review)
}

/// Star rating from a scalar or a `{value|score|stars}` wrapper.
///
/// Values in 1..=5 are taken as-is (floats rounded); values in (5, 10]
/// are a 0-10 scale and halved before rounding.
pub(crate) fn review_rating_from_value(value: &Value) -> Option<u8> {
    match value {
        Value::Number(_) | Value::String(_) => {
            let raw = number_from(value)?;
            normalize_star_value(raw)
        }
        Value::Object(map) => ["value", "score", "stars"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(number_from)
            .and_then(normalize_star_value),
        _ => None,
    }
}

fn normalize_star_value(raw: f64) -> Option<u8> {
    if !(0.5..=10.0).contains(&raw) {
        return None;
    }
    let scaled = if raw > 5.0 { raw / 2.0 } else { raw };
    let rounded = scaled.round().clamp(1.0, 5.0);
    Some(rounded as u8)
}

fn extract_organization_name(payload: &Value) -> Option<String> {
    [
        "businessName",
        "orgName",
        "name",
        "data.businessName",
        "data.orgName",
        "data.name",
        "data.title",
    ]
    .iter()
    .find_map(|path| get_str_at(payload, path))
    .map(str::trim)
    .filter(|name| !name.is_empty())
    .map(String::from)
}

/// Organization rating on the 1..5 scale, rescaling 0-10 values
pub(crate) fn extract_organization_rating(payload: &Value) -> Option<f64> {
    let direct = ["rating.value", "rating.score", "rating.average", "rating"]
        .iter()
        .find_map(|path| get_path(payload, path).and_then(number_from))
        .and_then(normalize_org_rating);
    if direct.is_some() {
        return direct;
    }
    deep_find_number(payload, &["rating", "ratingValue"], DEEP_SCAN_DEPTH)
        .and_then(normalize_org_rating)
}

fn normalize_org_rating(raw: f64) -> Option<f64> {
    if raw <= 0.0 {
        return None;
    }
    let scaled = if raw > 5.0 && raw <= 10.0 { raw / 2.0 } else { raw };
    (0.5..=5.0).contains(&scaled).then_some(scaled)
}

/// Maximum total reported anywhere in the payload.
pub(crate) fn extract_total_count(payload: &Value) -> u64 {
    let mut best: u64 = 0;

    for key in TOTAL_KEYS {
        if let Some(n) = get_path(payload, key).and_then(Value::as_u64) {
            best = best.max(n);
        }
        for container in TOTAL_CONTAINERS {
            let path = format!("{container}.{key}");
            if let Some(n) = get_path(payload, &path).and_then(Value::as_u64) {
                best = best.max(n);
            }
        }
    }
    if let Some(n) = get_path(payload, "pagination.total").and_then(Value::as_u64) {
        best = best.max(n);
    }

    if best == 0 {
        if let Some(n) = deep_find_number(payload, &TOTAL_KEYS, DEEP_SCAN_DEPTH) {
            if n >= 0.0 {
                best = n as u64;
            }
        }
    }

    best
}

/// Walk a dot-separated path through objects
pub(crate) fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

pub(crate) fn get_str_at<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    get_path(value, path).and_then(Value::as_str)
}

fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn deep_find_number(value: &Value, keys: &[&str], depth: usize) -> Option<f64> {
    if depth == 0 {
        return None;
    }
    match value {
        Value::Object(map) => {
            for key in keys {
                if let Some(n) = map.get(*key).and_then(number_from) {
                    return Some(n);
                }
            }
            map.values()
                .find_map(|child| deep_find_number(child, keys, depth - 1))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|item| deep_find_number(item, keys, depth - 1)),
        _ => None,
    }
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
