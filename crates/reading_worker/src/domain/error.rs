use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to write record under key {key}: {source}")]
    PersistenceWrite {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("message {message_id} has no device_id, record has no storage key")]
    MissingStorageKey { message_id: String },

    #[error("storage key {0:?} has no characters usable as a bucket key")]
    InvalidStorageKey(String),

    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Non-fatal findings while decoding a structured payload. The affected reading-set
/// is skipped or trimmed; the rest of the message is still decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    #[error("reading-set {name:?} is not an object, skipped")]
    ReadingSetNotObject { name: String },

    #[error("reading-set at position {position} is not an array, skipped")]
    ReadingSetNotArray { position: usize },

    #[error("reading-set at position {position} has {len} of 12 readings, missing fields omitted")]
    ShortReadingSet { position: usize, len: usize },

    #[error("reading-set at position {position} has {len} readings, readings past 12 ignored")]
    ExtraReadings { position: usize, len: usize },
}
