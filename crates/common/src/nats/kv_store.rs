use crate::nats::traits::KeyValueStore;
use anyhow::{Context, Result};
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

/// JetStream key-value bucket client.
pub struct NatsKeyValueStore {
    store: kv::Store,
    bucket: String,
}

impl NatsKeyValueStore {
    pub async fn new(jetstream: &jetstream::Context, bucket: &str, history: i64) -> Result<Self> {
        debug!(bucket = %bucket, "initializing key-value bucket client");

        let store = match jetstream.get_key_value(bucket).await {
            Ok(store) => {
                debug!(bucket = %bucket, "key-value bucket already exists");
                store
            }
            Err(_) => {
                let store = jetstream
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        description: "Sensor records keyed by storage key".to_string(),
                        history,
                        ..Default::default()
                    })
                    .await
                    .context("failed to create key-value bucket")?;
                info!(bucket = %bucket, history, "created key-value bucket");
                store
            }
        };

        Ok(Self {
            store,
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for NatsKeyValueStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<u64> {
        self.store
            .put(key, value)
            .await
            .with_context(|| format!("failed to put {key} into bucket {}", self.bucket))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.store
            .get(key)
            .await
            .with_context(|| format!("failed to get {key} from bucket {}", self.bucket))
    }
}
