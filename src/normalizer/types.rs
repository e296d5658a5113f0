//! Shared shapes produced by all three extraction strategies

use chrono::{DateTime, Utc};

/// Display name stored when the upstream omits the author entirely
pub const ANONYMOUS_AUTHOR: &str = "Аноним";

/// One review as extracted from the upstream, prior to sanitization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReview {
    /// Upstream-assigned review id, when the payload carried one
    pub yandex_id: Option<String>,
    /// Cleaned author display name, never empty
    pub author_name: String,
    /// Star rating in 1..=5
    pub rating: Option<u8>,
    pub text: Option<String>,
    /// Branch name for multi-branch organizations
    pub branch_name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl RawReview {
    /// Whether the extraction produced anything worth keeping
    #[must_use]
    pub fn is_meaningful(&self) -> bool {
        self.yandex_id.is_some()
            || self.rating.is_some()
            || self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.author_name != ANONYMOUS_AUTHOR
    }
}

/// Result of one extraction pass, merged across endpoints by the engine
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub organization_name: Option<String>,
    /// Upstream-reported organization rating on the 1..5 scale
    pub rating: Option<f64>,
    /// Upstream-reported total review count. Monotonically raised across
    /// pages, never lowered.
    pub total_reviews: u64,
    pub reviews: Vec<RawReview>,
}

impl FetchResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty()
    }
}

/// Keys whose presence in an object marks it as review-shaped
pub(crate) const REVIEW_SIGNATURE_KEYS: [&str; 8] = [
    "text",
    "author",
    "rating",
    "reviewId",
    "comment",
    "body",
    "updatedTime",
    "stars",
];

/// True when the first element of `items` looks like a review object
pub(crate) fn is_review_array(items: &[serde_json::Value]) -> bool {
    let Some(first) = items.first() else {
        return false;
    };
    let Some(obj) = first.as_object() else {
        return false;
    };
    REVIEW_SIGNATURE_KEYS.iter().any(|key| obj.contains_key(*key))
}
