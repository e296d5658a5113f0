//! Error types surfaced to the API layer
//!
//! Transport failures inside the acquisition engine are deliberately NOT
//! represented here: they degrade to logged `None` returns and feed the
//! pagination stopping rules. Only conditions a caller must act on become
//! an `EngineError`.

use thiserror::Error;

/// Result type alias for sync operations
pub type SyncResult<T> = Result<T, EngineError>;

/// Error conditions surfaced to the caller of the sync operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// The supplied organization URL could not be parsed (422-class)
    #[error("Некорректная ссылка на организацию Яндекс.Карт: {0}")]
    InvalidUrl(String),

    /// Referenced source row does not exist
    #[error("Источник #{0} не найден")]
    SourceNotFound(i64),

    /// Another sync holds the per-source lock (409-class)
    #[error("Синхронизация уже выполняется")]
    SyncInProgress,

    /// Database transaction failure; prior data is preserved
    #[error("Не удалось сохранить отзывы: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the condition should be reported as a caller mistake
    /// rather than a server-side failure
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, EngineError::InvalidUrl(_) | EngineError::SyncInProgress)
    }
}
