//! Organization URL parsing
//!
//! Extracts the organization id, mirror host tag, and (when present) the
//! slug from a user-supplied Yandex Maps URL. Pure string work: never
//! touches the network, never panics on malformed input.

use once_cell::sync::Lazy;
use regex::Regex;

/// Mirror hostname the organization lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTag {
    Ru,
    Com,
}

impl HostTag {
    /// Tag as it is persisted alongside a source
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HostTag::Ru => "ru",
            HostTag::Com => "com",
        }
    }

    /// Upstream origin for this mirror
    #[must_use]
    pub fn base_url(self) -> &'static str {
        match self {
            HostTag::Ru => "https://yandex.ru",
            HostTag::Com => "https://yandex.com",
        }
    }
}

/// Result of parsing an organization URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOrgUrl {
    /// Upstream organization id (digits, at least 5 long)
    pub org_id: String,
    pub host_tag: HostTag,
    /// URL slug between `/org/` and the id, when the URL carries one
    pub slug: Option<String>,
}

static ORG_SLUG_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/org/([^/?#]+)/(\d{5,})").expect("static pattern")
});
static ORG_ID_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/org/(\d{5,})").expect("static pattern"));
static OID_ANYWHERE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"oid=(\d{5,})").expect("static pattern"));

/// Parse an organization URL into id, host tag, and slug.
///
/// Recognized formats, tried in order:
/// 1. `/org/<slug>/<digits>`
/// 2. `/org/<digits>`
/// 3. query parameter `oid=<digits>`
/// 4. substring `oid=<digits>` anywhere
///
/// The host tag defaults to [`HostTag::Ru`] when the hostname carries
/// neither mirror suffix.
#[must_use]
pub fn parse_organization_url(input: &str) -> Option<ParsedOrgUrl> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let host_tag = detect_host_tag(input);

    if let Some(caps) = ORG_SLUG_ID.captures(input) {
        let slug = caps.get(1).map(|m| m.as_str().to_string());
        // A purely numeric "slug" of id length means the URL had no slug
        // and the first path segment was the id itself.
        let org_id = caps[2].to_string();
        let slug = slug.filter(|s| !s.chars().all(|c| c.is_ascii_digit()));
        return Some(ParsedOrgUrl { org_id, host_tag, slug });
    }

    if let Some(caps) = ORG_ID_ONLY.captures(input) {
        return Some(ParsedOrgUrl {
            org_id: caps[1].to_string(),
            host_tag,
            slug: None,
        });
    }

    if let Ok(parsed) = url::Url::parse(input) {
        for (key, value) in parsed.query_pairs() {
            if key == "oid" && value.len() >= 5 && value.chars().all(|c| c.is_ascii_digit()) {
                return Some(ParsedOrgUrl {
                    org_id: value.to_string(),
                    host_tag,
                    slug: None,
                });
            }
        }
    }

    OID_ANYWHERE.captures(input).map(|caps| ParsedOrgUrl {
        org_id: caps[1].to_string(),
        host_tag,
        slug: None,
    })
}

/// Extract just the organization id, or `None` for malformed input.
///
/// This is the validation entry point the API layer calls before
/// registering a source.
#[must_use]
pub fn parse_organization_id(input: &str) -> Option<String> {
    parse_organization_url(input).map(|parsed| parsed.org_id)
}

fn detect_host_tag(input: &str) -> HostTag {
    if let Ok(parsed) = url::Url::parse(input) {
        if let Some(host) = parsed.host_str() {
            if host == "yandex.com" || host.ends_with(".yandex.com") {
                return HostTag::Com;
            }
            return HostTag::Ru;
        }
    }
    // Schemeless input: fall back to a substring check.
    if input.contains("yandex.com") {
        HostTag::Com
    } else {
        HostTag::Ru
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_and_id_format() {
        let parsed = parse_organization_url(
            "https://yandex.ru/maps/org/samoye_populyarnoye_kafe/1010501395/reviews/",
        )
        .expect("should parse");
        assert_eq!(parsed.org_id, "1010501395");
        assert_eq!(parsed.host_tag, HostTag::Ru);
        assert_eq!(parsed.slug.as_deref(), Some("samoye_populyarnoye_kafe"));
    }

    #[test]
    fn id_only_format() {
        let parsed =
            parse_organization_url("https://yandex.ru/maps/org/1234567890/").expect("should parse");
        assert_eq!(parsed.org_id, "1234567890");
        assert_eq!(parsed.slug, None);
    }

    #[test]
    fn oid_query_parameter() {
        let parsed = parse_organization_url("https://yandex.ru/maps/?mode=search&oid=987654321")
            .expect("should parse");
        assert_eq!(parsed.org_id, "987654321");
    }

    #[test]
    fn oid_substring_without_valid_url() {
        let parsed = parse_organization_url("some text with oid=112233445 inside")
            .expect("should parse");
        assert_eq!(parsed.org_id, "112233445");
    }

    #[test]
    fn com_mirror_detected() {
        let parsed = parse_organization_url("https://yandex.com/maps/org/cafe/1010501395/")
            .expect("should parse");
        assert_eq!(parsed.host_tag, HostTag::Com);
        assert_eq!(parsed.host_tag.base_url(), "https://yandex.com");
    }

    #[test]
    fn host_defaults_to_ru() {
        let parsed =
            parse_organization_url("https://example.org/maps/org/cafe/1010501395/").expect("ok");
        assert_eq!(parsed.host_tag, HostTag::Ru);
    }

    #[test]
    fn short_ids_rejected() {
        assert_eq!(parse_organization_id("https://yandex.ru/maps/org/1234/"), None);
        assert_eq!(parse_organization_id("oid=99"), None);
    }

    #[test]
    fn malformed_input_returns_none() {
        assert_eq!(parse_organization_id(""), None);
        assert_eq!(parse_organization_id("not a url at all"), None);
        assert_eq!(parse_organization_id("https://yandex.ru/maps/"), None);
    }

    #[test]
    fn parse_is_idempotent_on_extracted_id() {
        // Feeding the extracted id back in (as an oid string) yields the
        // same id.
        let id = parse_organization_id("https://yandex.ru/maps/org/kafe/1010501395/").expect("ok");
        let again = parse_organization_id(&format!("oid={id}")).expect("ok");
        assert_eq!(id, again);
    }
}
