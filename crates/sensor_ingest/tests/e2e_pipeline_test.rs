#![cfg(feature = "integration-tests")]

use anyhow::Result;
use async_nats::HeaderMap;
use bytes::Bytes;
use common::nats::{NatsClient, NatsConnectConfig};
use reading_worker::reading_worker::{ReadingWorker, ReadingWorkerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, Image};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const STREAM: &str = "sensor_events";
const SUBJECT: &str = "sensors.>";
const BUCKET: &str = "sensor_records";

/// NATS server with JetStream enabled
#[derive(Debug, Clone)]
struct NatsWithJetStream {
    ports: Vec<ContainerPort>,
}

impl Default for NatsWithJetStream {
    fn default() -> Self {
        Self {
            ports: vec![ContainerPort::Tcp(4222)],
        }
    }
}

impl Image for NatsWithJetStream {
    fn name(&self) -> &str {
        "nats"
    }

    fn tag(&self) -> &str {
        "latest"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::seconds(3)]
    }

    fn cmd(&self) -> impl IntoIterator<Item = impl Into<std::borrow::Cow<'_, str>>> {
        vec!["--js"]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

async fn start_nats() -> Result<(ContainerAsync<NatsWithJetStream>, Arc<NatsClient>)> {
    let container = NatsWithJetStream::default().start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(4222).await?;

    let client = NatsClient::connect(&NatsConnectConfig {
        url: format!("nats://{}:{}", host, port),
        credentials_file: None,
        timeout: Duration::from_secs(10),
    })
    .await?;
    client.ensure_stream(STREAM, SUBJECT).await?;

    Ok((container, Arc::new(client)))
}

fn headers(device_id: &str, event: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("device_id", device_id);
    headers.insert("event", event);
    headers.insert("published_at", "2024-05-01T12:00:00Z");
    headers
}

async fn stored(client: &NatsClient, key: &str) -> Result<Option<Value>> {
    let store = client.create_key_value_store(BUCKET, 1).await?;
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[tokio::test]
async fn test_sensor_messages_are_stored_by_key() -> Result<()> {
    let (_container, nats_client) = start_nats().await?;

    let worker = ReadingWorker::new(
        nats_client.clone(),
        ReadingWorkerConfig {
            stream: STREAM.to_string(),
            subject: SUBJECT.to_string(),
            consumer_name: "sensor-ingest-e2e".to_string(),
            kv_bucket: BUCKET.to_string(),
            kv_history: 1,
            batch_size: 10,
            batch_wait_secs: 1,
        },
    )
    .await?;

    let drain_writes = worker.closer();
    let process = worker.into_runner_process();
    let ctx = CancellationToken::new();
    let handle = tokio::spawn(process(ctx.clone()));

    let publisher = nats_client.create_publisher_client();
    publisher
        .publish(
            "sensors.sensor-7".to_string(),
            headers("sensor-7", "reading"),
            Bytes::from_static(br#"{"set1":{"TS":"12345","Temp":"21.5"}}"#),
        )
        .await?;
    publisher
        .publish(
            "sensors.sensor-8".to_string(),
            headers("sensor-8", "reading"),
            Bytes::from_static(br#"["device42",[1620000000,100,40]]"#),
        )
        .await?;
    publisher
        .publish(
            "sensors.d1".to_string(),
            headers("d1", "motion"),
            Bytes::from_static(b"not json"),
        )
        .await?;

    let mut reading_set = None;
    let mut positional = None;
    let mut raw_event = None;
    for _ in 0..20 {
        sleep(Duration::from_millis(500)).await;
        reading_set = stored(&nats_client, "sensor-7").await?;
        positional = stored(&nats_client, "device42").await?;
        raw_event = stored(&nats_client, "d1").await?;
        if reading_set.is_some() && positional.is_some() && raw_event.is_some() {
            break;
        }
    }

    ctx.cancel();
    handle.await??;
    drain_writes().await?;

    assert_eq!(reading_set, Some(json!({"TS": "12345", "Temp": 21.5})));
    assert_eq!(
        positional,
        Some(json!({
            "Timestamp": 1620000000,
            "Light level (lux)": 100,
            "Loudness (dB)": 40
        }))
    );

    let raw_event = raw_event.expect("raw event record should be stored");
    assert_eq!(raw_event["device_id"], "d1");
    assert_eq!(raw_event["event"], "motion");
    assert_eq!(raw_event["data"], "not json");
    assert_eq!(raw_event["published_at"], "2024-05-01T12:00:00Z");
    assert!(raw_event["source_message_id"]
        .as_str()
        .is_some_and(|id| id.starts_with(STREAM)));

    Ok(())
}
