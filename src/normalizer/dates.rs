//! Russian-language date parsing
//!
//! The upstream renders review dates in Russian relative forms ("вчера",
//! "3 дня назад") and absolute genitive forms ("5 января 2024"). The
//! parser accepts those plus ISO strings; anything unrecognized falls back
//! to `now`. The reference time is a parameter so tests can pin it.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_AGO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+)?\s*([а-яё]+)\s+назад$").expect("static pattern")
});
static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2})\s+([а-яё]+)\.?(?:\s+(\d{4}))?(?:\s*г\.?)?$").expect("static pattern")
});

/// Genitive month names, matched by prefix. "ма" sits last so "март"
/// wins before the May prefix.
const MONTH_PREFIXES: [(&str, u32); 12] = [
    ("январ", 1),
    ("феврал", 2),
    ("март", 3),
    ("апрел", 4),
    ("июн", 6),
    ("июл", 7),
    ("август", 8),
    ("сентябр", 9),
    ("октябр", 10),
    ("ноябр", 11),
    ("декабр", 12),
    ("ма", 5),
];

/// Parse a Russian or ISO date string against the given reference time.
///
/// Unknown strings fall back to permissive parsing and finally to `now`.
#[must_use]
pub fn parse_russian_date(input: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    try_parse(input, now).unwrap_or(now)
}

/// Parse attempt without the terminal `now` fallback, for callers that
/// need to distinguish "absent" from "unparseable".
#[must_use]
pub fn try_parse(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = input.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    match text.as_str() {
        "сегодня" => return start_of_day(now, 0),
        "вчера" => return start_of_day(now, 1),
        "позавчера" => return start_of_day(now, 2),
        _ => {}
    }

    if let Some(caps) = RELATIVE_AGO.captures(&text) {
        let amount: i64 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        if let Some(delta) = unit_duration(&caps[2], amount) {
            return Some(now - delta);
        }
    }

    if let Some(caps) = DAY_MONTH_YEAR.captures(&text) {
        let day: u32 = caps[1].parse().ok()?;
        if let Some(month) = month_from_prefix(&caps[2]) {
            let explicit_year: Option<i32> = caps.get(3).and_then(|m| m.as_str().parse().ok());
            let year = explicit_year.unwrap_or_else(|| now.year());
            let date = NaiveDate::from_ymd_opt(year, month, day)?;
            let stamp = date.and_hms_opt(0, 0, 0)?.and_utc();
            // A current-year date in the future means the review predates
            // the year boundary.
            if explicit_year.is_none() && stamp > now {
                let rolled = NaiveDate::from_ymd_opt(year - 1, month, day)?;
                return Some(rolled.and_hms_opt(0, 0, 0)?.and_utc());
            }
            return Some(stamp);
        }
    }

    permissive_parse(&text)
}

/// Interpret a numeric or string date value from a JSON payload.
///
/// Numbers are Unix seconds, or milliseconds when above 10^12. Strings go
/// through ISO parsing and then the Russian forms.
#[must_use]
pub fn parse_date_value(value: &serde_json::Value, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw <= 0.0 {
                return None;
            }
            let seconds = if raw > 1_000_000_000_000.0 { raw / 1000.0 } else { raw };
            DateTime::from_timestamp(seconds as i64, 0)
        }
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            // All-digit strings are timestamps, not day-of-month forms.
            if trimmed.chars().all(|c| c.is_ascii_digit()) {
                let raw: f64 = trimmed.parse().ok()?;
                let seconds = if raw > 1_000_000_000_000.0 { raw / 1000.0 } else { raw };
                return DateTime::from_timestamp(seconds as i64, 0);
            }
            Some(parse_russian_date(trimmed, now))
        }
        _ => None,
    }
}

fn start_of_day(now: DateTime<Utc>, days_back: i64) -> Option<DateTime<Utc>> {
    (now - Duration::days(days_back))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

fn unit_duration(unit: &str, amount: i64) -> Option<Duration> {
    if unit.starts_with("сек") {
        Some(Duration::seconds(amount))
    } else if unit.starts_with("мин") {
        Some(Duration::minutes(amount))
    } else if unit.starts_with("час") {
        Some(Duration::hours(amount))
    } else if unit.starts_with("дн") || unit.starts_with("ден") {
        Some(Duration::days(amount))
    } else if unit.starts_with("недел") {
        Some(Duration::weeks(amount))
    } else if unit.starts_with("месяц") {
        Some(Duration::days(amount * 30))
    } else if unit.starts_with("год") || unit.starts_with("лет") {
        Some(Duration::days(amount * 365))
    } else {
        None
    }
}

fn month_from_prefix(token: &str) -> Option<u32> {
    MONTH_PREFIXES
        .iter()
        .find(|(prefix, _)| token.starts_with(prefix))
        .map(|(_, month)| *month)
}

fn permissive_parse(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d", "%d.%m.%Y"] {
        if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc());
        }
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            return parsed.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
