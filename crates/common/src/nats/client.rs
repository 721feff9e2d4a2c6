use crate::nats::kv_store::NatsKeyValueStore;
use crate::nats::trace_context::inject_trace_context;
use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, KeyValueStore, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Connection settings for [`NatsClient::connect`].
#[derive(Debug, Clone)]
pub struct NatsConnectConfig {
    pub url: String,
    /// Path to a `.creds` file. `None` connects without credentials.
    pub credentials_file: Option<String>,
    pub timeout: Duration,
}

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(config: &NatsConnectConfig) -> Result<Self> {
        info!(
            url = %config.url,
            timeout_ms = config.timeout.as_millis(),
            with_credentials = config.credentials_file.is_some(),
            "connecting to NATS"
        );

        let mut options = async_nats::ConnectOptions::new().connection_timeout(config.timeout);
        if let Some(path) = &config.credentials_file {
            options = options
                .credentials_file(path)
                .await
                .with_context(|| format!("failed to load NATS credentials from {path}"))?;
        }

        let client = options
            .connect(config.url.as_str())
            .await
            .context("failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Makes sure `stream_name` exists, creating it to capture `subject` when missing.
    pub async fn ensure_stream(&self, stream_name: &str, subject: &str) -> Result<()> {
        debug!(stream = %stream_name, subject = %subject, "ensuring stream exists");

        match self.jetstream.get_stream(stream_name).await {
            Ok(_) => {
                debug!(stream = %stream_name, "stream already exists");
            }
            Err(_) => {
                self.jetstream
                    .create_stream(StreamConfig {
                        name: stream_name.to_string(),
                        subjects: vec![subject.to_string()],
                        description: Some("Inbound sensor messages".to_string()),
                        ..Default::default()
                    })
                    .await
                    .context("failed to create stream")?;
                info!(stream = %stream_name, subject = %subject, "created stream");
            }
        }

        Ok(())
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    /// Opens (or creates) the key-value bucket used as the record store.
    pub async fn create_key_value_store(
        &self,
        bucket: &str,
        history: i64,
    ) -> Result<Arc<dyn KeyValueStore>> {
        let store = NatsKeyValueStore::new(&self.jetstream, bucket, history).await?;
        Ok(Arc::new(store))
    }

    /// Flushes buffered publishes. The connection itself closes on drop.
    pub async fn close(&self) -> Result<()> {
        info!("closing NATS connection");
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "failed to flush NATS connection on close");
        }
        Ok(())
    }
}

pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<jetstream::Message>> {
        use futures::StreamExt;

        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("failed to fetch messages")?;

        let mut batch = Vec::new();
        while let Some(msg) = messages.next().await {
            match msg {
                Ok(message) => batch.push(message),
                Err(e) => warn!(error = %e, "error receiving message from batch"),
            }
        }
        Ok(batch)
    }
}

pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    #[instrument(skip(self, headers, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish(&self, subject: String, headers: HeaderMap, payload: Bytes) -> Result<()> {
        let mut headers = headers;
        inject_trace_context(&mut headers);

        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("failed to publish message to JetStream")?;

        ack.await
            .context("failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}
