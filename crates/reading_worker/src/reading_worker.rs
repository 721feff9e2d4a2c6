use crate::domain::ReadingIngestService;
use crate::nats::{NatsKvRecordSink, ReadingConsumerService};
use anyhow::Result;
use common::nats::{
    JetStreamConsumer, KeyValueStore, NatsClient, NatsConsumeLoggingLayer,
    NatsConsumeLoggingService, NatsConsumeTracingLayer, NatsConsumeTracingService, TowerConsumer,
    TowerConsumerConfig,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

type ReadingLayeredService =
    NatsConsumeTracingService<NatsConsumeLoggingService<ReadingConsumerService>>;

pub struct ReadingWorkerConfig {
    pub stream: String,
    pub subject: String,
    pub consumer_name: String,
    pub kv_bucket: String,
    pub kv_history: i64,
    pub batch_size: usize,
    pub batch_wait_secs: u64,
}

/// Consumes sensor messages from JetStream and stores the decoded records in a
/// key-value bucket.
pub struct ReadingWorker {
    consumer: TowerConsumer<ReadingLayeredService>,
    ingest_service: Arc<ReadingIngestService>,
}

impl ReadingWorker {
    pub async fn new(nats_client: Arc<NatsClient>, config: ReadingWorkerConfig) -> Result<Self> {
        let store = nats_client
            .create_key_value_store(&config.kv_bucket, config.kv_history)
            .await?;

        Self::with_clients(nats_client.create_consumer_client(), store, config).await
    }

    pub async fn with_clients(
        consumer_client: Arc<dyn JetStreamConsumer>,
        store: Arc<dyn KeyValueStore>,
        config: ReadingWorkerConfig,
    ) -> Result<Self> {
        info!(
            stream = %config.stream,
            subject = %config.subject,
            bucket = %config.kv_bucket,
            "initializing reading worker"
        );

        let sink = Arc::new(NatsKvRecordSink::new(store));
        let ingest_service = Arc::new(ReadingIngestService::new(sink));

        let layered_service = ServiceBuilder::new()
            .layer(NatsConsumeTracingLayer::new(config.consumer_name.clone()))
            .layer(NatsConsumeLoggingLayer::new())
            .service(ReadingConsumerService::new(ingest_service.clone()));

        let consumer = TowerConsumer::new(
            consumer_client,
            TowerConsumerConfig {
                stream_name: config.stream,
                consumer_name: config.consumer_name,
                filter_subject: config.subject,
                batch_size: config.batch_size,
                max_wait: Duration::from_secs(config.batch_wait_secs),
            },
            layered_service,
        )
        .await?;

        info!("reading worker initialized");

        Ok(Self {
            consumer,
            ingest_service,
        })
    }

    /// Returns the closer that waits for in-flight record writes. Call before
    /// [`Self::into_runner_process`] consumes the worker.
    pub fn closer(&self) -> impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static {
        let ingest_service = self.ingest_service.clone();
        move || {
            Box::pin(async move {
                info!(
                    pending = ingest_service.pending_writes(),
                    "waiting for pending record writes"
                );
                ingest_service.wait_for_pending_writes().await;
                Ok(())
            })
        }
    }

    pub fn into_runner_process(
        self,
    ) -> Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send> {
        let consumer = self.consumer;
        Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }))
    }
}
