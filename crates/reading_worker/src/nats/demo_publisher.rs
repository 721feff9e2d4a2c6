use crate::domain::{
    DEVICE_ID_ATTRIBUTE, EVENT_ATTRIBUTE, POSITIONAL_FIELDS, PUBLISHED_AT_ATTRIBUTE,
};
use anyhow::{bail, Context, Result};
use async_nats::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::nats::JetStreamPublisher;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::info;

#[derive(Debug, Clone)]
pub struct DemoPublisherConfig {
    pub subject_prefix: String,
    pub interval_ms: u64,
    pub device_id: String,
}

/// A sample message as the demo publisher sends it.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoSample {
    pub event: &'static str,
    pub payload: Bytes,
}

/// Publishes sample sensor messages forever, cycling through a reading-set object, a
/// positional array and a plain-text event.
pub async fn run_demo_publisher(
    jetstream: Arc<dyn JetStreamPublisher>,
    config: DemoPublisherConfig,
) -> Result<()> {
    info!(
        subject_prefix = %config.subject_prefix,
        interval_ms = config.interval_ms,
        device_id = %config.device_id,
        "starting demo sensor publisher"
    );

    if config.interval_ms == 0 {
        bail!("demo publisher interval must be greater than zero");
    }

    let subject = format!("{}.{}", config.subject_prefix, config.device_id);
    let mut ticker = interval(Duration::from_millis(config.interval_ms));
    let mut counter: u64 = 0;

    loop {
        ticker.tick().await;

        let now = Utc::now();
        let sample = demo_sample(counter, &config.device_id, now);

        let mut headers = HeaderMap::new();
        headers.insert(DEVICE_ID_ATTRIBUTE, config.device_id.as_str());
        headers.insert(EVENT_ATTRIBUTE, sample.event);
        headers.insert(PUBLISHED_AT_ATTRIBUTE, now.to_rfc3339().as_str());

        let size_bytes = sample.payload.len();

        jetstream
            .publish(subject.clone(), headers, sample.payload)
            .await
            .context("failed to publish demo sensor message")?;

        info!(
            subject = %subject,
            event = sample.event,
            counter,
            size_bytes,
            "published demo sensor message"
        );

        counter += 1;
    }
}

/// Builds the `counter`-th sample. Readings drift with the counter so successive
/// records are distinguishable.
pub fn demo_sample(counter: u64, device_id: &str, now: DateTime<Utc>) -> DemoSample {
    let timestamp = now.timestamp();
    let drift = (counter % 10) as f64 / 10.0;

    match counter % 3 {
        0 => DemoSample {
            event: "reading_sets",
            payload: Bytes::from(
                json!({
                    "environment": {
                        "TS": timestamp.to_string(),
                        "Temp": format!("{:.1}", 21.0 + drift),
                        "Hum": format!("{}", 40 + counter % 5),
                    },
                    "air": {
                        "TS": timestamp.to_string(),
                        "CO2": format!("{}", 410 + counter % 20),
                        "PM2.5": "n/a",
                    }
                })
                .to_string(),
            ),
        },
        1 => {
            let mut row = vec![json!(timestamp)];
            row.extend((1..POSITIONAL_FIELDS.len()).map(|i| json!(i as f64 * 10.0 + drift)));
            DemoSample {
                event: "positional",
                payload: Bytes::from(json!([device_id, row]).to_string()),
            }
        }
        _ => DemoSample {
            event: "motion",
            payload: Bytes::from(format!("motion detected ({})", counter)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{decode_message, InboundMessage, PayloadShape};
    use common::nats::MockJetStreamPublisher;
    use std::collections::HashMap;

    fn decode(sample: &DemoSample) -> PayloadShape {
        let attributes = HashMap::from([(DEVICE_ID_ATTRIBUTE.to_string(), "demo".to_string())]);
        let message = InboundMessage::new("demo:1", attributes, sample.payload.clone());
        decode_message(&message).shape
    }

    #[test]
    fn test_samples_cover_every_payload_shape() {
        let now = Utc::now();

        assert_eq!(decode(&demo_sample(0, "demo", now)), PayloadShape::ReadingSets);
        assert_eq!(decode(&demo_sample(1, "demo", now)), PayloadShape::Positional);
        assert_eq!(decode(&demo_sample(2, "demo", now)), PayloadShape::RawEvent);
        assert_eq!(decode(&demo_sample(3, "demo", now)), PayloadShape::ReadingSets);
    }

    #[test]
    fn test_positional_sample_has_full_row() {
        let sample = demo_sample(1, "demo-device", Utc::now());
        let payload: serde_json::Value = serde_json::from_slice(&sample.payload).unwrap();

        assert_eq!(payload[0], "demo-device");
        assert_eq!(
            payload[1].as_array().map(Vec::len),
            Some(POSITIONAL_FIELDS.len())
        );
    }

    #[tokio::test]
    async fn test_demo_publisher_publishes_messages() {
        let mut mock_jetstream = MockJetStreamPublisher::new();
        mock_jetstream
            .expect_publish()
            .withf(|subject: &String, headers: &HeaderMap, _payload: &Bytes| {
                subject == "sensors.demo-device"
                    && headers.get(DEVICE_ID_ATTRIBUTE).map(|v| v.as_str()) == Some("demo-device")
                    && headers.get(EVENT_ATTRIBUTE).is_some()
                    && headers.get(PUBLISHED_AT_ATTRIBUTE).is_some()
            })
            .times(1..)
            .returning(|_, _, _| Ok(()));

        let config = DemoPublisherConfig {
            subject_prefix: "sensors".to_string(),
            interval_ms: 100,
            device_id: "demo-device".to_string(),
        };

        let jetstream = Arc::new(mock_jetstream);
        let handle = tokio::spawn(async move { run_demo_publisher(jetstream, config).await });

        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.abort();
    }

    #[tokio::test]
    async fn test_zero_interval_is_an_error_not_a_panic() {
        let mut mock_jetstream = MockJetStreamPublisher::new();
        mock_jetstream.expect_publish().never();

        let config = DemoPublisherConfig {
            subject_prefix: "sensors".to_string(),
            interval_ms: 0,
            device_id: "demo-device".to_string(),
        };

        let handle = tokio::spawn(run_demo_publisher(Arc::new(mock_jetstream), config));
        let joined = handle.await;

        assert!(joined.is_ok());
        assert!(joined.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_demo_publisher_stops_on_publish_error() {
        let mut mock_jetstream = MockJetStreamPublisher::new();
        mock_jetstream
            .expect_publish()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("no stream")));

        let config = DemoPublisherConfig {
            subject_prefix: "sensors".to_string(),
            interval_ms: 10,
            device_id: "demo-device".to_string(),
        };

        let result = run_demo_publisher(Arc::new(mock_jetstream), config).await;

        assert!(result.is_err());
    }
}
