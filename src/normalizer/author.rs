//! Author name cleanup
//!
//! The DOM often concatenates profile badges onto the author name
//! ("Иван Знаток города 5 уровня"). Badges are stripped only at word
//! boundaries so real names containing a badge substring survive.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::ANONYMOUS_AUTHOR;

static BADGES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:^|\s)Знаток города(?:\s+\d+\s+уровня)?(?:\s|$)",
        r"(?:^|\s)Активный автор(?:\s|$)",
        r"(?:^|\s)Местный эксперт(?:\s|$)",
        r"(?:^|\s)Эксперт(?:\s+\d+\s+уровня)?(?:\s|$)",
        r"(?:^|\s)Новичок(?:\s|$)",
        r"(?:^|\s)\d+\s*отзыв\S*(?:\s|$)",
        r"(?:^|\s)\d+\s*оцен\S*(?:\s|$)",
        r"(?:^|\s)\d+\s*фото\S*(?:\s|$)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static pattern"))
    .collect()
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("static pattern"));

/// Strip badge text and collapse whitespace. Empty results become the
/// anonymous placeholder.
#[must_use]
pub fn clean_author(raw: &str) -> String {
    let mut name = raw.trim().to_string();
    for badge in BADGES.iter() {
        // Replace with a space so adjacent tokens stay separated; a badge
        // may appear more than once after page-state concatenation.
        loop {
            let replaced = badge.replace_all(&name, " ").into_owned();
            if replaced == name {
                break;
            }
            name = replaced;
        }
    }

    let name = MULTI_SPACE.replace_all(name.trim(), " ").into_owned();
    if name.is_empty() {
        ANONYMOUS_AUTHOR.to_string()
    } else {
        name
    }
}
