use crate::analytics::VisitorEvent;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("event log I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed log row: {0}")]
    Malformed(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable, append-only destination for visitor events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event as a complete record.
    ///
    /// Concurrent callers never observe interleaved or partial records.
    async fn append(&self, event: &VisitorEvent) -> StorageResult<()>;
}
