mod config;

use common::nats::{NatsClient, NatsConnectConfig};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use ingest_runner::Runner;
use reading_worker::nats::{run_demo_publisher, DemoPublisherConfig};
use reading_worker::reading_worker::{ReadingWorker, ReadingWorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env().and_then(|cfg| cfg.validate().map(|()| cfg)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        stream = %config.nats_stream,
        subject = %config.nats_subject,
        bucket = %config.kv_bucket,
        "starting sensor-ingest service"
    );
    debug!("Configuration: {:?}", config);

    let nats_client = match connect_nats(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to initialize NATS");
            std::process::exit(1);
        }
    };

    let worker = match ReadingWorker::new(
        nats_client.clone(),
        ReadingWorkerConfig {
            stream: config.nats_stream.clone(),
            subject: config.nats_subject.clone(),
            consumer_name: config.nats_consumer_name.clone(),
            kv_bucket: config.kv_bucket.clone(),
            kv_history: config.kv_history,
            batch_size: config.nats_batch_size,
            batch_wait_secs: config.nats_batch_wait_secs,
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to initialize reading worker");
            std::process::exit(1);
        }
    };

    let drain_writes = worker.closer();

    let mut runner = Runner::new().with_boxed_process("reading_worker", worker.into_runner_process());

    if config.demo_publisher_enabled {
        let publisher = nats_client.create_publisher_client();
        let demo_config = DemoPublisherConfig {
            subject_prefix: config.demo_subject_prefix(),
            interval_ms: config.demo_publisher_interval_ms,
            device_id: config.demo_device_id.clone(),
        };
        runner = runner.with_named_process("demo_publisher", move |ctx| async move {
            tokio::select! {
                _ = ctx.cancelled() => Ok(()),
                result = run_demo_publisher(publisher, demo_config) => result,
            }
        });
    }

    // Writes must drain before the connection they go through is flushed.
    runner = runner
        .with_closer(move || async move {
            info!("running cleanup tasks");
            if let Err(e) = drain_writes().await {
                error!(error = %e, "failed to drain pending writes");
            }
            if let Err(e) = nats_client.close().await {
                error!(error = %e, "failed to close NATS connection");
            }
            shutdown_telemetry(telemetry_providers);
            info!("cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs));

    runner.run().await;
}

async fn connect_nats(config: &ServiceConfig) -> anyhow::Result<Arc<NatsClient>> {
    info!("initializing NATS");
    let nats_client = NatsClient::connect(&NatsConnectConfig {
        url: config.nats_url.clone(),
        credentials_file: config.credentials_file(),
        timeout: Duration::from_secs(config.startup_timeout_secs),
    })
    .await?;

    nats_client
        .ensure_stream(&config.nats_stream, &config.nats_subject)
        .await?;

    Ok(Arc::new(nats_client))
}
