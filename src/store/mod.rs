//! Local review store
//!
//! SQLite-backed persistence for sources and their reviews, including the
//! transactional materialization of fetch results. The cardinal rule:
//! never destroy locally held reviews on a failed or empty fetch. A
//! stale-but-complete set always beats a partial or empty overwrite.

pub mod lock;

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::normalizer::{FetchResult, RawReview, ANONYMOUS_AUTHOR};

/// Idempotent schema bootstrap
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS yandex_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    organization_name TEXT,
    rating REAL,
    total_reviews INTEGER NOT NULL DEFAULT 0,
    last_synced_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    yandex_source_id INTEGER NOT NULL REFERENCES yandex_sources(id) ON DELETE CASCADE,
    author_name TEXT NOT NULL,
    author_phone TEXT,
    rating INTEGER,
    text TEXT,
    branch_name TEXT,
    published_at INTEGER,
    yandex_id TEXT UNIQUE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Browse queries sort a source's reviews by publication date.
CREATE INDEX IF NOT EXISTS idx_reviews_source_published
    ON reviews(yandex_source_id, published_at);

-- Named distributed locks with TTL (see lock.rs).
CREATE TABLE IF NOT EXISTS sync_locks (
    key TEXT PRIMARY KEY,
    expires_at INTEGER NOT NULL
);
"#;

/// A user's registered organization URL
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub organization_name: Option<String>,
    /// Organization rating on the 1.00..5.00 scale, two decimals
    pub rating: Option<f64>,
    pub total_reviews: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stored review belonging to a source
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub id: i64,
    pub yandex_source_id: i64,
    pub author_name: String,
    /// Reserved for a planned feature; always NULL today
    pub author_phone: Option<String>,
    pub rating: Option<u8>,
    pub text: Option<String>,
    pub branch_name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub yandex_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: i64,
    user_id: i64,
    url: String,
    organization_name: Option<String>,
    rating: Option<f64>,
    total_reviews: i64,
    last_synced_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            id: row.id,
            user_id: row.user_id,
            url: row.url,
            organization_name: row.organization_name,
            rating: row.rating,
            total_reviews: row.total_reviews,
            last_synced_at: row.last_synced_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or(DateTime::UNIX_EPOCH),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or(DateTime::UNIX_EPOCH),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: i64,
    yandex_source_id: i64,
    author_name: String,
    author_phone: Option<String>,
    rating: Option<i64>,
    text: Option<String>,
    branch_name: Option<String>,
    published_at: Option<i64>,
    yandex_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<ReviewRow> for Review {
    fn from(row: ReviewRow) -> Self {
        Review {
            id: row.id,
            yandex_source_id: row.yandex_source_id,
            author_name: row.author_name,
            author_phone: row.author_phone,
            rating: row.rating.and_then(|r| u8::try_from(r).ok()),
            text: row.text,
            branch_name: row.branch_name,
            published_at: row.published_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            yandex_id: row.yandex_id,
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or(DateTime::UNIX_EPOCH),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or(DateTime::UNIX_EPOCH),
        }
    }
}

/// SQLite-backed store shared by the engine and the coordinator
#[derive(Clone)]
pub struct ReviewStore {
    pool: SqlitePool,
}

impl ReviewStore {
    /// Open (or create) the store at `path`. WAL mode for concurrent
    /// reads, foreign keys on so source deletion cascades.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        Self::bootstrap(pool).await
    }

    /// In-memory store for tests. Single connection: each in-memory
    /// connection is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        Self::bootstrap(pool).await
    }

    async fn bootstrap(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to initialize database schema")?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a source for a user
    pub async fn create_source(&self, user_id: i64, url: &str) -> Result<Source> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO yandex_sources (user_id, url, total_reviews, created_at, updated_at)
             VALUES (?, ?, 0, ?, ?)",
        )
        .bind(user_id)
        .bind(url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert source")?;

        self.get_source(result.last_insert_rowid())
            .await?
            .context("Inserted source vanished")
    }

    pub async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let row: Option<SourceRow> =
            sqlx::query_as("SELECT * FROM yandex_sources WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query source")?;
        Ok(row.map(Source::from))
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as("SELECT * FROM yandex_sources ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list sources")?;
        Ok(rows.into_iter().map(Source::from).collect())
    }

    /// Delete a source; its reviews cascade away with it.
    pub async fn delete_source(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM yandex_sources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete source")?;
        Ok(())
    }

    pub async fn review_count(&self, source_id: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reviews WHERE yandex_source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count reviews")?;
        Ok(row.0)
    }

    pub async fn reviews_for_source(&self, source_id: i64) -> Result<Vec<Review>> {
        let rows: Vec<ReviewRow> =
            sqlx::query_as("SELECT * FROM reviews WHERE yandex_source_id = ? ORDER BY id")
                .bind(source_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to load reviews")?;
        Ok(rows.into_iter().map(Review::from).collect())
    }

    /// Full-sync materialization: replace the source's reviews with the
    /// fetched set inside one transaction, then refresh metadata.
    ///
    /// A zero-review fetch never deletes: only `last_synced_at` advances.
    pub async fn materialize_full(&self, source: &Source, fetched: &FetchResult) -> Result<Source> {
        if fetched.reviews.is_empty() {
            log::warn!(
                "fetch for source #{} returned zero reviews, keeping {} existing rows",
                source.id,
                source.total_reviews,
            );
            return self.touch_last_synced(source.id).await;
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM reviews WHERE yandex_source_id = ?")
            .bind(source.id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear previous reviews")?;

        let mut batch_ids: HashSet<String> = HashSet::new();
        for raw in &fetched.reviews {
            let clean = sanitize_review(raw);
            if let Some(id) = &clean.yandex_id {
                if !batch_ids.insert(id.clone()) {
                    continue;
                }
            }
            insert_review(&mut tx, source.id, &clean, now).await?;
        }

        tx.commit().await.context("Failed to commit full sync")?;

        self.update_source_metadata(
            source.id,
            fetched.organization_name.as_deref(),
            fetched.rating,
        )
        .await
    }

    /// Incremental materialization: insert only reviews not already
    /// stored, matched by upstream id or, failing that, by content.
    pub async fn materialize_incremental(
        &self,
        source: &Source,
        fetched: &FetchResult,
    ) -> Result<Source> {
        if fetched.reviews.is_empty() {
            log::warn!(
                "incremental fetch for source #{} returned zero reviews",
                source.id,
            );
            return self.touch_last_synced(source.id).await;
        }

        let existing: Vec<(String,)> = sqlx::query_as(
            "SELECT yandex_id FROM reviews
             WHERE yandex_source_id = ? AND yandex_id IS NOT NULL",
        )
        .bind(source.id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load existing review ids")?;
        let mut known_ids: HashSet<String> = existing.into_iter().map(|(id,)| id).collect();

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let mut inserted = 0usize;

        for raw in &fetched.reviews {
            let clean = sanitize_review(raw);
            match &clean.yandex_id {
                Some(id) => {
                    if !known_ids.insert(id.clone()) {
                        continue;
                    }
                }
                None => {
                    // Id-less reviews dedup by exact (author, text) match.
                    let exists: (i64,) = sqlx::query_as(
                        "SELECT EXISTS(
                             SELECT 1 FROM reviews
                             WHERE yandex_source_id = ? AND author_name = ? AND text IS ?
                         )",
                    )
                    .bind(source.id)
                    .bind(&clean.author_name)
                    .bind(&clean.text)
                    .fetch_one(&mut *tx)
                    .await
                    .context("Failed to check for content duplicate")?;
                    if exists.0 != 0 {
                        continue;
                    }
                }
            }
            insert_review(&mut tx, source.id, &clean, now).await?;
            inserted += 1;
        }

        tx.commit().await.context("Failed to commit incremental sync")?;
        log::info!("source #{}: {} new reviews", source.id, inserted);

        self.update_source_metadata(
            source.id,
            fetched.organization_name.as_deref(),
            fetched.rating,
        )
        .await
    }

    /// Advance `last_synced_at` without touching reviews
    async fn touch_last_synced(&self, source_id: i64) -> Result<Source> {
        let now = Utc::now().timestamp();
        sqlx::query("UPDATE yandex_sources SET last_synced_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(source_id)
            .execute(&self.pool)
            .await
            .context("Failed to update last_synced_at")?;
        self.get_source(source_id)
            .await?
            .context("Source vanished during sync")
    }

    /// Refresh source metadata from stored rows after a sync.
    ///
    /// Name keeps the old value when the new one is empty; rating prefers
    /// the upstream-reported value, then the average of stored star
    /// ratings; `total_reviews` is always the stored row count.
    async fn update_source_metadata(
        &self,
        source_id: i64,
        fetched_name: Option<&str>,
        fetched_rating: Option<f64>,
    ) -> Result<Source> {
        let stored_count = self.review_count(source_id).await?;

        let rating = match fetched_rating {
            Some(value) => Some(round2(value)),
            None => {
                let avg: (Option<f64>,) = sqlx::query_as(
                    "SELECT AVG(rating) FROM reviews
                     WHERE yandex_source_id = ? AND rating IS NOT NULL",
                )
                .bind(source_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to average ratings")?;
                avg.0.map(round2)
            }
        };

        let name = fetched_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from);

        let now = Utc::now().timestamp();
        sqlx::query(
            "UPDATE yandex_sources SET
                 organization_name = COALESCE(?, organization_name),
                 rating = ?,
                 total_reviews = ?,
                 last_synced_at = ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(rating)
        .bind(stored_count)
        .bind(now)
        .bind(now)
        .bind(source_id)
        .execute(&self.pool)
        .await
        .context("Failed to update source metadata")?;

        self.get_source(source_id)
            .await?
            .context("Source vanished during sync")
    }
}

/// Sanitized insert payload
struct CleanReview {
    author_name: String,
    rating: Option<u8>,
    text: Option<String>,
    branch_name: Option<String>,
    published_at: Option<i64>,
    yandex_id: Option<String>,
}

static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static pattern"));
static EXCESS_SPACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\S\n]{2,}").expect("static pattern"));

fn sanitize_review(raw: &RawReview) -> CleanReview {
    let text = raw.text.as_deref().map(sanitize_text).filter(|t| !t.is_empty());

    let author = raw.author_name.trim();
    let author_name = if author.is_empty() {
        ANONYMOUS_AUTHOR.to_string()
    } else {
        author.to_string()
    };

    CleanReview {
        author_name,
        rating: raw.rating.filter(|r| *r >= 1).map(|r| r.min(5)),
        text,
        branch_name: raw
            .branch_name
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(String::from),
        published_at: raw.published_at.map(|ts| ts.timestamp()),
        yandex_id: raw
            .yandex_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from),
    }
}

fn sanitize_text(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed_newlines = EXCESS_NEWLINES.replace_all(normalized.trim(), "\n\n");
    EXCESS_SPACES.replace_all(&collapsed_newlines, " ").into_owned()
}

async fn insert_review(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_id: i64,
    clean: &CleanReview,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO reviews
             (yandex_source_id, author_name, author_phone, rating, text,
              branch_name, published_at, yandex_id, created_at, updated_at)
         VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(source_id)
    .bind(&clean.author_name)
    .bind(clean.rating.map(i64::from))
    .bind(&clean.text)
    .bind(&clean.branch_name)
    .bind(clean.published_at)
    .bind(&clean.yandex_id)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await
    .context("Failed to insert review")?;
    Ok(())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(author: &str, text: &str) -> RawReview {
        RawReview {
            yandex_id: None,
            author_name: author.to_string(),
            rating: None,
            text: Some(text.to_string()),
            branch_name: None,
            published_at: None,
        }
    }

    #[test]
    fn text_whitespace_collapsing() {
        let clean = sanitize_review(&raw("Иван", "строка\n\n\n\nещё    строка\t\tи хвост  "));
        assert_eq!(clean.text.as_deref(), Some("строка\n\nещё строка и хвост"));
    }

    #[test]
    fn empty_author_becomes_placeholder() {
        let clean = sanitize_review(&raw("   ", "текст"));
        assert_eq!(clean.author_name, ANONYMOUS_AUTHOR);
    }

    #[test]
    fn rating_clamped_to_valid_range() {
        let mut review = raw("Иван", "текст");
        review.rating = Some(0);
        assert_eq!(sanitize_review(&review).rating, None);
        review.rating = Some(7);
        assert_eq!(sanitize_review(&review).rating, Some(5));
        review.rating = Some(3);
        assert_eq!(sanitize_review(&review).rating, Some(3));
    }

    #[test]
    fn blank_fields_become_null() {
        let mut review = raw("Иван", "   ");
        review.branch_name = Some("  ".to_string());
        review.yandex_id = Some("".to_string());
        let clean = sanitize_review(&review);
        assert_eq!(clean.text, None);
        assert_eq!(clean.branch_name, None);
        assert_eq!(clean.yandex_id, None);
    }

    #[test]
    fn rounding_to_two_decimals() {
        assert_eq!(round2(4.499), 4.5);
        assert_eq!(round2(4.504), 4.5);
        assert_eq!(round2(3.333333), 3.33);
    }
}
