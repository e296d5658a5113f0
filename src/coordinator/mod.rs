//! Sync coordination
//!
//! Serializes syncs per source behind a named TTL lock and drives batch
//! syncs across every registered source. The engine instance is reused
//! within a batch, but the session identity is reset and the proxy
//! rotated between sources; only the proxy index carries over.

use crate::engine::FetchEngine;
use crate::error::{EngineError, SyncResult};
use crate::store::lock::{sync_lock_key, SYNC_LOCK_TTL};
use crate::store::{ReviewStore, Source};

/// Result of one source within a batch sync
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub source_id: i64,
    pub url: String,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Sync completed; carries the stored review count
    Synced { total_reviews: i64 },
    /// Sync failed or was rejected; carries the user-facing message
    Failed { message: String },
}

/// Entry point the API layer drives
pub struct SyncCoordinator {
    store: ReviewStore,
    engine: FetchEngine,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(store: ReviewStore, engine: FetchEngine) -> Self {
        Self { store, engine }
    }

    /// Full sync: fetch, then replace the source's review set.
    pub async fn sync_reviews(&mut self, source_id: i64) -> SyncResult<Source> {
        self.sync_with_lock(source_id, false).await
    }

    /// Incremental sync: fetch, then insert only unseen reviews.
    pub async fn sync_new_reviews(&mut self, source_id: i64) -> SyncResult<Source> {
        self.sync_with_lock(source_id, true).await
    }

    /// Sync every registered source sequentially, collecting per-source
    /// outcomes instead of failing the batch on the first error.
    pub async fn sync_all_sources(&mut self, incremental: bool) -> SyncResult<Vec<SyncOutcome>> {
        let sources = self.store.list_sources().await?;
        let mut outcomes = Vec::with_capacity(sources.len());

        for (index, source) in sources.iter().enumerate() {
            if index > 0 {
                self.engine.rotate_proxy();
                self.engine.reset_session();
                if !self.engine_batch_delay().is_zero() {
                    tokio::time::sleep(self.engine_batch_delay()).await;
                }
            }

            let status = match self.sync_with_lock(source.id, incremental).await {
                Ok(synced) => SyncStatus::Synced {
                    total_reviews: synced.total_reviews,
                },
                Err(err) => {
                    log::warn!("batch sync failed for source #{}: {err}", source.id);
                    SyncStatus::Failed {
                        message: err.to_string(),
                    }
                }
            };
            outcomes.push(SyncOutcome {
                source_id: source.id,
                url: source.url.clone(),
                status,
            });
        }

        Ok(outcomes)
    }

    async fn sync_with_lock(&mut self, source_id: i64, incremental: bool) -> SyncResult<Source> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(EngineError::SourceNotFound(source_id))?;

        let key = sync_lock_key(source_id);
        if !self.store.try_acquire_lock(&key, SYNC_LOCK_TTL).await? {
            return Err(EngineError::SyncInProgress);
        }

        // Hold the result so the lock is released on every exit path.
        let result = self.sync_locked(&source, incremental).await;
        if let Err(err) = self.store.release_lock(&key).await {
            log::error!("failed to release sync lock {key}: {err}");
        }
        result
    }

    async fn sync_locked(&mut self, source: &Source, incremental: bool) -> SyncResult<Source> {
        let fetched = self.engine.fetch_reviews(&source.url).await?;
        let synced = if incremental {
            self.store.materialize_incremental(source, &fetched).await?
        } else {
            self.store.materialize_full(source, &fetched).await?
        };
        Ok(synced)
    }

    fn engine_batch_delay(&self) -> std::time::Duration {
        self.engine.config().batch_source_delay
    }

    /// The underlying store, for callers that need direct reads
    #[must_use]
    pub fn store(&self) -> &ReviewStore {
        &self.store
    }
}
