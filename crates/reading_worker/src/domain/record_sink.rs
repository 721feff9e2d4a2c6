use crate::domain::{IngestResult, Record, StorageKey};
use async_trait::async_trait;

/// Document store the decoded records are written to.
///
/// Implementations overwrite whatever is already stored under `key`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn put(&self, key: &StorageKey, record: &Record) -> IngestResult<()>;
}
