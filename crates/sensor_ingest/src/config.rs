use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("configuration field `{0}` must not be blank")]
    Blank(&'static str),

    #[error("configuration field `{0}` must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Path to a NATS `.creds` file. Empty connects without credentials.
    #[serde(default)]
    pub nats_credentials_file: String,

    /// JetStream stream the sensor messages are published to
    #[serde(default = "default_nats_stream")]
    pub nats_stream: String,

    /// Subject filter for the stream and the consumer
    #[serde(default = "default_nats_subject")]
    pub nats_subject: String,

    /// Durable consumer name
    #[serde(default = "default_nats_consumer_name")]
    pub nats_consumer_name: String,

    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Startup timeout for the NATS connection in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Record store
    /// Key-value bucket the decoded records are written to
    #[serde(default = "default_kv_bucket")]
    pub kv_bucket: String,

    /// Revisions kept per key when the bucket is created
    #[serde(default = "default_kv_history")]
    pub kv_history: i64,

    // Demo publisher
    #[serde(default)]
    pub demo_publisher_enabled: bool,

    #[serde(default = "default_demo_publisher_interval_ms")]
    pub demo_publisher_interval_ms: u64,

    #[serde(default = "default_demo_device_id")]
    pub demo_device_id: String,

    // OpenTelemetry
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    /// Time allowed for closers on shutdown, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_stream() -> String {
    "sensor_events".to_string()
}

fn default_nats_subject() -> String {
    "sensors.>".to_string()
}

fn default_nats_consumer_name() -> String {
    "sensor-ingest".to_string()
}

fn default_nats_batch_size() -> usize {
    50
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_kv_bucket() -> String {
    "sensor_records".to_string()
}

fn default_kv_history() -> i64 {
    1
}

fn default_demo_publisher_interval_ms() -> u64 {
    5000
}

fn default_demo_device_id() -> String {
    "demo-sensor-01".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "sensor-ingest".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("SENSOR_INGEST"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Rejects configurations the service cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("nats_url", &self.nats_url),
            ("nats_stream", &self.nats_stream),
            ("nats_subject", &self.nats_subject),
            ("nats_consumer_name", &self.nats_consumer_name),
            ("kv_bucket", &self.kv_bucket),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Blank(name));
            }
        }

        if self.nats_batch_size == 0 {
            return Err(ConfigError::Zero("nats_batch_size"));
        }

        if self.demo_publisher_enabled && self.demo_publisher_interval_ms == 0 {
            return Err(ConfigError::Zero("demo_publisher_interval_ms"));
        }

        Ok(())
    }

    pub fn credentials_file(&self) -> Option<String> {
        let path = self.nats_credentials_file.trim();
        (!path.is_empty()).then(|| path.to_string())
    }

    /// Subject prefix the demo publisher appends the device id to.
    pub fn demo_subject_prefix(&self) -> String {
        let subject = self.nats_subject.trim_end_matches(".>").trim_end_matches(".*");
        subject.to_string()
    }
}
