//! Acquisition engine for Yandex Maps organization reviews.
//!
//! Turns an organization URL into a complete, deduplicated review set in
//! the presence of an adversarial upstream: anti-bot challenges, opaque
//! pagination contracts, response-shape drift, per-query result caps, and
//! rate limiting. Fetched reviews are materialized into a local SQLite
//! store so downstream consumers browse locally instead of re-scraping.
//!
//! The outer API layer drives four operations:
//! [`parse_organization_id`], [`SyncCoordinator::sync_reviews`],
//! [`SyncCoordinator::sync_new_reviews`], and
//! [`SyncCoordinator::sync_all_sources`].

pub mod captcha;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod normalizer;
pub mod session;
pub mod signer;
pub mod store;
pub mod url_parser;

pub use config::EngineConfig;
pub use coordinator::{SyncCoordinator, SyncOutcome, SyncStatus};
pub use engine::{Deadline, FetchEngine};
pub use error::{EngineError, SyncResult};
pub use normalizer::{FetchResult, RawReview, ANONYMOUS_AUTHOR};
pub use store::{Review, ReviewStore, Source};
pub use url_parser::{parse_organization_id, parse_organization_url, HostTag, ParsedOrgUrl};
