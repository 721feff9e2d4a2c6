use crate::domain::{
    decode_message, IngestError, InboundMessage, KeyedRecord, PayloadShape, Record, RecordSink,
    StorageKey,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Outcome of handing one message to the service. Describes what was dispatched,
/// not what was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub message_id: String,
    pub shape: PayloadShape,
    /// Records queued for writing.
    pub dispatched: usize,
    /// Records dropped because they had no storage key.
    pub skipped: usize,
    /// Keys written more than once by this message, in key order.
    pub shared_keys: Vec<StorageKey>,
}

/// Decodes inbound messages and writes the resulting records in the background.
///
/// Writes for one message run in order on a single task, so when several records share a
/// key the last one wins. Write failures are logged and never retried.
pub struct ReadingIngestService {
    sink: Arc<dyn RecordSink>,
    writes: TaskTracker,
}

impl ReadingIngestService {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self {
            sink,
            writes: TaskTracker::new(),
        }
    }

    /// Decodes `message` and dispatches its writes. Returns without waiting for them.
    pub fn ingest(&self, message: InboundMessage) -> IngestReceipt {
        info!(
            message_id = %message.id,
            device_id = message.device_id().unwrap_or_default(),
            event = message.event().unwrap_or_default(),
            published_at = message.published_at().unwrap_or_default(),
            payload_bytes = message.body.len(),
            "sensor event received"
        );

        let decoded = decode_message(&message);

        for warning in &decoded.warnings {
            warn!(message_id = %message.id, warning = %warning, "payload partially decoded");
        }

        let mut writes: Vec<(StorageKey, Record)> = Vec::with_capacity(decoded.records.len());
        let mut skipped = 0;

        for KeyedRecord { key, record } in decoded.records {
            match key {
                Some(key) => writes.push((key, record)),
                None => {
                    let err = IngestError::MissingStorageKey {
                        message_id: message.id.clone(),
                    };
                    error!(error = %err, "record not written");
                    skipped += 1;
                }
            }
        }

        let shared_keys = shared_keys(&writes);
        for (key, count) in &shared_keys {
            warn!(
                message_id = %message.id,
                key = %key,
                record_count = count,
                "records share a storage key, only the last one is kept"
            );
        }

        let receipt = IngestReceipt {
            message_id: message.id.clone(),
            shape: decoded.shape,
            dispatched: writes.len(),
            skipped,
            shared_keys: shared_keys.into_iter().map(|(key, _)| key).collect(),
        };

        debug!(
            message_id = %receipt.message_id,
            shape = receipt.shape.as_str(),
            dispatched = receipt.dispatched,
            skipped = receipt.skipped,
            "payload decoded"
        );

        if !writes.is_empty() {
            self.writes.spawn(
                write_records(self.sink.clone(), message.id, writes).instrument(Span::current()),
            );
        }

        receipt
    }

    /// Number of messages whose writes are still running.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Waits for every dispatched write to finish.
    pub async fn wait_for_pending_writes(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }
}

/// Keys that occur more than once among `writes`, with their record counts.
fn shared_keys(writes: &[(StorageKey, Record)]) -> Vec<(StorageKey, usize)> {
    let mut counts: BTreeMap<&StorageKey, usize> = BTreeMap::new();
    for (key, _) in writes {
        *counts.entry(key).or_default() += 1;
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, count)| (key.clone(), count))
        .collect()
}

async fn write_records(
    sink: Arc<dyn RecordSink>,
    message_id: String,
    writes: Vec<(StorageKey, Record)>,
) {
    for (key, record) in writes {
        match sink.put(&key, &record).await {
            Ok(()) => {
                info!(
                    message_id = %message_id,
                    key = %key,
                    field_count = record.len(),
                    "record stored"
                );
            }
            Err(e) => {
                error!(message_id = %message_id, key = %key, error = %e, "failed to store record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldValue, MockRecordSink, DATA_FIELD};
    use bytes::Bytes;
    use mockall::Sequence;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    fn message(body: &'static str, device_id: Option<&str>) -> InboundMessage {
        let attributes = device_id
            .map(|id| HashMap::from([("device_id".to_string(), id.to_string())]))
            .unwrap_or_default();
        InboundMessage::new("msg-1", attributes, Bytes::from_static(body.as_bytes()))
    }

    #[tokio::test]
    async fn test_positional_records_are_written_in_order() {
        let mut sink = MockRecordSink::new();
        let mut seq = Sequence::new();

        sink.expect_put()
            .withf(|key, record| {
                key.as_str() == "dev-1" && record.get("Timestamp") == Some(&FieldValue::from(1))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        sink.expect_put()
            .withf(|key, record| {
                key.as_str() == "dev-1" && record.get("Timestamp") == Some(&FieldValue::from(2))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let service = ReadingIngestService::new(Arc::new(sink));

        let receipt = service.ingest(message(r#"["dev-1",[1,10],[2,20]]"#, Some("ignored")));
        service.wait_for_pending_writes().await;

        assert_eq!(receipt.shape, PayloadShape::Positional);
        assert_eq!(receipt.dispatched, 2);
        assert_eq!(receipt.skipped, 0);
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_later_records() {
        let mut sink = MockRecordSink::new();
        let mut seq = Sequence::new();

        sink.expect_put()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|key, _| {
                Err(IngestError::PersistenceWrite {
                    key: key.to_string(),
                    source: anyhow::anyhow!("bucket unavailable"),
                })
            });
        sink.expect_put()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let service = ReadingIngestService::new(Arc::new(sink));

        let receipt = service.ingest(message(r#"{"a":{"v":"1"},"b":{"v":"2"}}"#, Some("d1")));
        service.wait_for_pending_writes().await;

        assert_eq!(receipt.shape, PayloadShape::ReadingSets);
        assert_eq!(receipt.dispatched, 2);
    }

    #[tokio::test]
    async fn test_raw_event_without_device_id_is_skipped() {
        let mut sink = MockRecordSink::new();
        sink.expect_put().never();

        let service = ReadingIngestService::new(Arc::new(sink));

        let receipt = service.ingest(message("hello", None));
        service.wait_for_pending_writes().await;

        assert_eq!(receipt.shape, PayloadShape::RawEvent);
        assert_eq!(receipt.dispatched, 0);
        assert_eq!(receipt.skipped, 1);
    }

    #[tokio::test]
    async fn test_raw_event_is_written_under_device_id() {
        let mut sink = MockRecordSink::new();
        sink.expect_put()
            .withf(|key, record| {
                key.as_str() == "d1" && record.get(DATA_FIELD) == Some(&FieldValue::text("hello"))
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let service = ReadingIngestService::new(Arc::new(sink));

        service.ingest(message("hello", Some("d1")));
        service.wait_for_pending_writes().await;
    }

    #[test]
    fn test_shared_keys_counts_repeated_keys_only() {
        let writes = vec![
            (StorageKey::from("b"), Record::new()),
            (StorageKey::from("a"), Record::new()),
            (StorageKey::from("b"), Record::new()),
            (StorageKey::from("c"), Record::new()),
            (StorageKey::from("b"), Record::new()),
        ];

        assert_eq!(shared_keys(&writes), vec![(StorageKey::from("b"), 3)]);
        assert!(shared_keys(&writes[..2]).is_empty());
    }

    #[tokio::test]
    async fn test_reading_sets_under_one_device_are_flagged() {
        let mut sink = MockRecordSink::new();
        let mut seq = Sequence::new();
        sink.expect_put()
            .withf(|_, record| record.get("v") == Some(&FieldValue::from(1)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        sink.expect_put()
            .withf(|_, record| record.get("v") == Some(&FieldValue::from(2)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let service = ReadingIngestService::new(Arc::new(sink));

        let receipt = service.ingest(message(r#"{"a":{"v":"1"},"b":{"v":"2"}}"#, Some("d1")));
        service.wait_for_pending_writes().await;

        assert_eq!(receipt.shared_keys, vec![StorageKey::from("d1")]);
    }

    #[tokio::test]
    async fn test_positional_rows_with_distinct_keys_are_not_flagged() {
        let mut sink = MockRecordSink::new();
        sink.expect_put().times(1).returning(|_, _| Ok(()));

        let service = ReadingIngestService::new(Arc::new(sink));

        let receipt = service.ingest(message(r#"["dev-1",[1,10]]"#, None));
        service.wait_for_pending_writes().await;

        assert!(receipt.shared_keys.is_empty());
    }

    /// Sink that takes a while per write and remembers what it stored.
    struct SlowSink {
        stored: Mutex<Vec<StorageKey>>,
    }

    #[async_trait::async_trait]
    impl RecordSink for SlowSink {
        async fn put(&self, key: &StorageKey, _record: &Record) -> crate::domain::IngestResult<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.stored.lock().unwrap().push(key.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ingest_returns_before_writes_complete() {
        let sink = Arc::new(SlowSink {
            stored: Mutex::new(Vec::new()),
        });
        let service = ReadingIngestService::new(sink.clone());

        let receipt = service.ingest(message(r#"{"a":{"v":"1"}}"#, Some("d1")));

        assert_eq!(receipt.dispatched, 1);
        assert!(sink.stored.lock().unwrap().is_empty());
        assert_eq!(service.pending_writes(), 1);

        service.wait_for_pending_writes().await;

        assert_eq!(*sink.stored.lock().unwrap(), vec![StorageKey::from("d1")]);
        assert_eq!(service.pending_writes(), 0);
    }
}
