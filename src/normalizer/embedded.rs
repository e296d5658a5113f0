//! Embedded page-state extraction
//!
//! The reviews page ships its data as script-level assignments of the form
//! `window.<NAME> = { ... };`. The JSON value is peeled out by brace
//! counting with string-aware escape tracking. Review bodies contain
//! braces and escaped quotes, so a regex alone cannot find the closing
//! brace.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::json::{extract_organization_rating, extract_total_count, get_str_at, review_from_value};
use super::types::{is_review_array, FetchResult};

/// State names tried first, in order
const KNOWN_STATE_NAMES: [&str; 3] = ["__PRELOADED_STATE__", "__INITIAL_STATE__", "__INITIAL_DATA__"];

/// Recursion bound for the descent over a decoded state object. Deeper
/// layouts are silently missed.
const MAX_DESCENT_DEPTH: usize = 5;

static WINDOW_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"window\.([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*\{").expect("static pattern")
});

/// Review-array paths specific to embedded state layouts
const EMBEDDED_REVIEW_PATHS: [&str; 9] = [
    "reviews",
    "reviewItems",
    "businessReviews",
    "data.reviews",
    "store.reviews",
    "result.reviews",
    "entities.reviews",
    "data.items",
    "items",
];

/// Extract reviews and organization metadata from the page HTML.
#[must_use]
pub fn parse_embedded(html: &str, org_id: &str, now: DateTime<Utc>) -> FetchResult {
    for state in extract_states(html) {
        let result = parse_state(&state, org_id, now);
        if !result.is_empty() || result.organization_name.is_some() {
            return result;
        }
    }
    FetchResult::default()
}

/// Decode every `window.<NAME> = {…}` assignment worth trying: the known
/// state names first, then anything else a lightweight scan discovers.
fn extract_states(html: &str) -> Vec<Value> {
    let mut states = Vec::new();
    let mut seen_names: Vec<String> = Vec::new();

    for name in KNOWN_STATE_NAMES {
        let needle = format!("window.{name}");
        if let Some(state) = extract_named_state(html, &needle) {
            states.push(state);
            seen_names.push(name.to_string());
        }
    }

    for caps in WINDOW_ASSIGNMENT.captures_iter(html) {
        let name = &caps[1];
        if seen_names.iter().any(|seen| seen == name) {
            continue;
        }
        let Some(m) = caps.get(0) else { continue };
        // The match ends at the opening brace.
        let brace_start = m.end() - 1;
        if let Some(raw) = extract_json_object(html, brace_start) {
            if let Ok(state) = serde_json::from_str::<Value>(raw) {
                states.push(state);
                seen_names.push(name.to_string());
            }
        }
    }

    states
}

fn extract_named_state(html: &str, needle: &str) -> Option<Value> {
    let at = html.find(needle)?;
    let rest = &html[at + needle.len()..];
    let eq = rest.find('=')?;
    let brace_offset = rest[eq..].find('{')?;
    let brace_start = at + needle.len() + eq + brace_offset;
    let raw = extract_json_object(html, brace_start)?;
    serde_json::from_str(raw).ok()
}

/// Slice out one balanced `{…}` object starting at `start` (which must
/// point at the opening brace). Tracks string state and backslash escapes
/// so braces inside review text do not confuse the counter.
pub(crate) fn extract_json_object(source: &str, start: usize) -> Option<&str> {
    let bytes = source.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&source[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_state(state: &Value, org_id: &str, now: DateTime<Utc>) -> FetchResult {
    let business = find_business_node(state, org_id);

    let reviews = find_embedded_reviews(state)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| review_from_value(item, now))
                .collect()
        })
        .unwrap_or_default();

    let organization_name = business
        .and_then(|node| {
            get_str_at(node, "name")
                .or_else(|| get_str_at(node, "title"))
        })
        .map(str::trim)
        .filter(|name| (2..200).contains(&name.chars().count()))
        .map(String::from);

    let rating = business
        .and_then(extract_organization_rating)
        .or_else(|| extract_organization_rating(state));

    let total_reviews = business
        .map(extract_total_count)
        .filter(|n| *n > 0)
        .unwrap_or_else(|| extract_total_count(state));

    FetchResult {
        organization_name,
        rating,
        total_reviews,
        reviews,
    }
}

/// Locate the business node: an object whose `id` equals the target org
/// id, or failing that the first object carrying a `name`/`title`.
fn find_business_node<'a>(state: &'a Value, org_id: &str) -> Option<&'a Value> {
    find_by_id(state, org_id, MAX_DESCENT_DEPTH)
        .or_else(|| find_named_node(state, MAX_DESCENT_DEPTH))
}

fn find_by_id<'a>(value: &'a Value, org_id: &str, depth: usize) -> Option<&'a Value> {
    if depth == 0 {
        return None;
    }
    match value {
        Value::Object(map) => {
            let id_matches = map.get("id").is_some_and(|id| match id {
                Value::String(s) => s == org_id,
                Value::Number(n) => n.to_string() == org_id,
                _ => false,
            });
            if id_matches {
                return Some(value);
            }
            map.values()
                .find_map(|child| find_by_id(child, org_id, depth - 1))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|item| find_by_id(item, org_id, depth - 1)),
        _ => None,
    }
}

fn find_named_node(value: &Value, depth: usize) -> Option<&Value> {
    if depth == 0 {
        return None;
    }
    match value {
        Value::Object(map) => {
            if map.contains_key("name") || map.contains_key("title") {
                return Some(value);
            }
            map.values().find_map(|child| find_named_node(child, depth - 1))
        }
        Value::Array(items) => items.iter().find_map(|item| find_named_node(item, depth - 1)),
        _ => None,
    }
}

fn find_embedded_reviews(state: &Value) -> Option<&Vec<Value>> {
    for path in EMBEDDED_REVIEW_PATHS {
        if let Some(items) = super::json::get_path(state, path).and_then(Value::as_array) {
            if !items.is_empty() && is_review_array(items) {
                return Some(items);
            }
        }
    }
    deep_review_scan(state, MAX_DESCENT_DEPTH)
}

fn deep_review_scan(value: &Value, depth: usize) -> Option<&Vec<Value>> {
    if depth == 0 {
        return None;
    }
    match value {
        Value::Object(map) => {
            for key in ["reviews", "reviewItems", "businessReviews", "items"] {
                if let Some(items) = map.get(key).and_then(Value::as_array) {
                    if !items.is_empty() && is_review_array(items) {
                        return Some(items);
                    }
                }
            }
            map.values().find_map(|child| deep_review_scan(child, depth - 1))
        }
        Value::Array(items) => items.iter().find_map(|item| deep_review_scan(item, depth - 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn peels_object_with_braces_in_strings() {
        let source = r#"window.__PRELOADED_STATE__ = {"a": "text with } brace", "b": {"c": "\" escaped {"}};"#;
        let start = source.find('{').unwrap();
        let raw = extract_json_object(source, start).unwrap();
        let value: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(value["a"], "text with } brace");
        assert_eq!(value["b"]["c"], "\" escaped {");
    }

    #[test]
    fn unbalanced_object_yields_none() {
        let source = r#"window.X = {"a": 1"#;
        let start = source.find('{').unwrap();
        assert!(extract_json_object(source, start).is_none());
    }

    #[test]
    fn extracts_preloaded_state_reviews() {
        let html = r#"<html><script>
            window.__PRELOADED_STATE__ = {
                "business": {"id": "1010501395", "name": "Кафе Пример",
                             "rating": {"value": 4.5}, "reviewCount": 137},
                "reviews": [
                    {"reviewId": "a1", "text": "Вкусно, уютно { как дома }", "rating": 5,
                     "author": {"name": "Иван"}},
                    {"reviewId": "a2", "text": "Так себе", "rating": 2,
                     "author": {"name": "Олег"}}
                ]
            };
        </script></html>"#;
        let result = parse_embedded(html, "1010501395", now());
        assert_eq!(result.reviews.len(), 2);
        assert_eq!(result.organization_name.as_deref(), Some("Кафе Пример"));
        assert_eq!(result.rating, Some(4.5));
        assert_eq!(result.total_reviews, 137);
        assert_eq!(result.reviews[0].text.as_deref(), Some("Вкусно, уютно { как дома }"));
    }

    #[test]
    fn discovers_unlisted_window_assignment() {
        let html = r#"<script>window.APP_DATA = {"store": {"reviews": [
            {"text": "Нормально", "rating": 3, "reviewId": "z9"}
        ]}, "name": "Салон"};</script>"#;
        let result = parse_embedded(html, "999999999", now());
        assert_eq!(result.reviews.len(), 1);
        assert_eq!(result.reviews[0].yandex_id.as_deref(), Some("z9"));
    }

    #[test]
    fn business_node_matched_by_org_id() {
        let html = r#"<script>window.__INITIAL_STATE__ = {
            "entities": {
                "org_a": {"id": "1111111", "name": "Чужая организация", "reviewCount": 5},
                "org_b": {"id": "2222222", "name": "Наша организация", "reviewCount": 42}
            },
            "reviews": [{"text": "Отлично!", "rating": 5}]
        };</script>"#;
        let result = parse_embedded(html, "2222222", now());
        assert_eq!(result.organization_name.as_deref(), Some("Наша организация"));
        assert_eq!(result.total_reviews, 42);
    }

    #[test]
    fn empty_html_yields_empty_result() {
        let result = parse_embedded("<html><body>пусто</body></html>", "123456", now());
        assert!(result.is_empty());
        assert_eq!(result.organization_name, None);
    }
}
