//! Two-level review deduplication
//!
//! Reviews arrive from overlapping passes (endpoints × sort orders ×
//! rating filters). Dedup is append-only: a later sighting never replaces
//! an earlier one. Level one is the upstream id; level two is a content
//! fingerprint for reviews without one.

use std::collections::HashSet;

use crate::normalizer::RawReview;

/// `md5(lower(trim(author)) + "|" + lower(trim(text)))`, suppressed when
/// both parts are empty.
#[must_use]
pub fn fingerprint(author: &str, text: &str) -> Option<String> {
    let author = author.trim().to_lowercase();
    let text = text.trim().to_lowercase();
    if author.is_empty() && text.is_empty() {
        return None;
    }
    let digest = md5::compute(format!("{author}|{text}"));
    Some(format!("{digest:x}"))
}

/// Append-only accumulator with id and fingerprint tracking
#[derive(Debug, Default)]
pub struct ReviewAccumulator {
    seen_ids: HashSet<String>,
    seen_fingerprints: HashSet<String>,
    reviews: Vec<RawReview>,
}

impl ReviewAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate unless its id or fingerprint was already seen.
    /// Returns whether the review was kept.
    pub fn push(&mut self, review: RawReview) -> bool {
        if let Some(id) = &review.yandex_id {
            if self.seen_ids.contains(id) {
                return false;
            }
        }

        let print = fingerprint(
            &review.author_name,
            review.text.as_deref().unwrap_or_default(),
        );
        if let Some(print) = &print {
            if self.seen_fingerprints.contains(print) {
                return false;
            }
        }

        if let Some(id) = &review.yandex_id {
            self.seen_ids.insert(id.clone());
        }
        if let Some(print) = print {
            self.seen_fingerprints.insert(print);
        }
        self.reviews.push(review);
        true
    }

    /// Merge a batch; returns how many were new.
    pub fn merge(&mut self, batch: Vec<RawReview>) -> usize {
        let before = self.reviews.len();
        for review in batch {
            self.push(review);
        }
        self.reviews.len() - before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reviews.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty()
    }

    #[must_use]
    pub fn into_reviews(self) -> Vec<RawReview> {
        self.reviews
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(id: Option<&str>, author: &str, text: &str) -> RawReview {
        RawReview {
            yandex_id: id.map(String::from),
            author_name: author.to_string(),
            rating: Some(4),
            text: Some(text.to_string()),
            branch_name: None,
            published_at: None,
        }
    }

    #[test]
    fn fingerprint_ignores_case_and_surrounding_whitespace() {
        let a = fingerprint("  Иван ", "Отличное место");
        let b = fingerprint("иван", "  отличное место  ");
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn fingerprint_differs_on_one_character() {
        let a = fingerprint("Иван", "Отличное место");
        let b = fingerprint("Иван", "Отличное место!");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_suppressed_when_both_empty() {
        assert_eq!(fingerprint("", "  "), None);
        assert!(fingerprint("Иван", "").is_some());
    }

    #[test]
    fn duplicate_ids_are_dropped() {
        let mut acc = ReviewAccumulator::new();
        assert!(acc.push(review(Some("1"), "Иван", "Текст один")));
        assert!(!acc.push(review(Some("1"), "Другой", "Другой текст")));
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn duplicate_fingerprints_dropped_without_id() {
        let mut acc = ReviewAccumulator::new();
        assert!(acc.push(review(None, "Иван", "Тот же текст")));
        assert!(!acc.push(review(None, " иван ", "тот же текст")));
        assert!(acc.push(review(None, "Иван", "Совсем другой текст")));
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn merge_counts_only_new() {
        let mut acc = ReviewAccumulator::new();
        acc.push(review(Some("1"), "А", "первый"));

        let added = acc.merge(vec![
            review(Some("1"), "А", "первый"),
            review(Some("2"), "Б", "второй"),
            review(None, "В", "третий"),
        ]);
        assert_eq!(added, 2);
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn merge_size_law() {
        // |A ∪ B| = |A| + |elements of B new by id and fingerprint|
        let batch_a = vec![
            review(Some("1"), "А", "текст 1"),
            review(Some("2"), "Б", "текст 2"),
        ];
        let batch_b = vec![
            review(Some("2"), "Б", "текст 2"),
            review(Some("3"), "В", "текст 3"),
            review(None, "А", "текст 1"),
        ];

        let mut acc = ReviewAccumulator::new();
        let a_added = acc.merge(batch_a);
        let b_added = acc.merge(batch_b);
        assert_eq!(a_added, 2);
        // id 2 dupes by id, the id-less one dupes by fingerprint
        assert_eq!(b_added, 1);
        assert_eq!(acc.len(), a_added + b_added);
    }
}
