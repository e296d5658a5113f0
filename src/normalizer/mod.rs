//! Response normalization
//!
//! Three extraction strategies (internal JSON endpoints, embedded page
//! state, and a DOM fallback) all funnel into the same [`FetchResult`]
//! shape. The upstream changes payload layouts between builds, so every
//! strategy tolerates deep and unknown key locations.

pub mod author;
pub mod dates;
pub mod dom;
pub mod embedded;
pub mod json;
mod types;

pub use types::{FetchResult, RawReview, ANONYMOUS_AUTHOR};
