use crate::domain::{IngestError, IngestResult, Record, RecordSink, StorageKey};
use async_trait::async_trait;
use bytes::Bytes;
use common::nats::KeyValueStore;
use std::sync::Arc;
use tracing::debug;

/// [`RecordSink`] backed by a JetStream key-value bucket. Records are stored as JSON.
pub struct NatsKvRecordSink {
    store: Arc<dyn KeyValueStore>,
}

impl NatsKvRecordSink {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordSink for NatsKvRecordSink {
    async fn put(&self, key: &StorageKey, record: &Record) -> IngestResult<()> {
        let bucket_key = bucket_key(key)?;
        let value = serde_json::to_vec(record)?;

        let revision = self
            .store
            .put(&bucket_key, Bytes::from(value))
            .await
            .map_err(|source| IngestError::PersistenceWrite {
                key: key.to_string(),
                source,
            })?;

        debug!(key = %key, bucket_key = %bucket_key, revision, "record written to bucket");
        Ok(())
    }
}

/// Maps a storage key onto the key alphabet the bucket accepts.
///
/// Characters outside `[A-Za-z0-9_\-/=.]` become `_`, runs of dots collapse to one and
/// leading or trailing dots are dropped. Distinct storage keys may map to the same
/// bucket key.
pub fn bucket_key(key: &StorageKey) -> IngestResult<String> {
    let mut mapped = String::with_capacity(key.as_str().len());

    for c in key.as_str().chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '=' | '.') {
            c
        } else {
            '_'
        };
        if c == '.' && mapped.ends_with('.') {
            continue;
        }
        mapped.push(c);
    }

    let trimmed = mapped.trim_matches('.');
    if trimmed.is_empty() {
        return Err(IngestError::InvalidStorageKey(key.to_string()));
    }

    Ok(trimmed.to_string())
}
