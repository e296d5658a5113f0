//! Named sync locks with TTL
//!
//! Serializes syncs per source across every process sharing the store:
//! a compare-and-set upsert on the `sync_locks` table either takes the
//! key or observes an unexpired holder. The TTL bounds how long a crashed
//! holder can block the source; release is an idempotent delete safe to
//! run on every exit path.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use super::ReviewStore;

/// TTL for per-source sync locks
pub const SYNC_LOCK_TTL: Duration = Duration::from_secs(300);

/// Lock key for one source
#[must_use]
pub fn sync_lock_key(source_id: i64) -> String {
    format!("sync_source_{source_id}")
}

impl ReviewStore {
    /// Try to take the named lock. Returns `false` when another holder
    /// has it and the TTL has not lapsed.
    pub async fn try_acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp();
        let expires_at = now + ttl.as_secs() as i64;

        // Insert wins an absent key; the conflict arm only steals the key
        // when the previous holder's TTL already lapsed.
        let result = sqlx::query(
            "INSERT INTO sync_locks (key, expires_at) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at
             WHERE sync_locks.expires_at <= ?",
        )
        .bind(key)
        .bind(expires_at)
        .bind(now)
        .execute(self.pool())
        .await
        .context("Failed to acquire sync lock")?;

        Ok(result.rows_affected() > 0)
    }

    /// Drop the named lock. Releasing a lock that is absent or already
    /// expired is not an error.
    pub async fn release_lock(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_locks WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await
            .context("Failed to release sync lock")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_until_release() -> Result<()> {
        let store = ReviewStore::open_in_memory().await?;
        let key = sync_lock_key(7);

        assert!(store.try_acquire_lock(&key, SYNC_LOCK_TTL).await?);
        assert!(!store.try_acquire_lock(&key, SYNC_LOCK_TTL).await?);

        store.release_lock(&key).await?;
        assert!(store.try_acquire_lock(&key, SYNC_LOCK_TTL).await?);
        Ok(())
    }

    #[tokio::test]
    async fn expired_lock_can_be_stolen() -> Result<()> {
        let store = ReviewStore::open_in_memory().await?;
        let key = sync_lock_key(8);

        assert!(store.try_acquire_lock(&key, Duration::ZERO).await?);
        // TTL of zero is already lapsed, so the CAS arm takes over.
        assert!(store.try_acquire_lock(&key, SYNC_LOCK_TTL).await?);
        Ok(())
    }

    #[tokio::test]
    async fn release_is_idempotent() -> Result<()> {
        let store = ReviewStore::open_in_memory().await?;
        let key = sync_lock_key(9);

        store.release_lock(&key).await?;
        assert!(store.try_acquire_lock(&key, SYNC_LOCK_TTL).await?);
        store.release_lock(&key).await?;
        store.release_lock(&key).await?;
        Ok(())
    }

    #[tokio::test]
    async fn locks_are_independent_per_key() -> Result<()> {
        let store = ReviewStore::open_in_memory().await?;
        assert!(store.try_acquire_lock(&sync_lock_key(1), SYNC_LOCK_TTL).await?);
        assert!(store.try_acquire_lock(&sync_lock_key(2), SYNC_LOCK_TTL).await?);
        Ok(())
    }
}
