//! Turns a queue message into the records to persist.
//!
//! Three payload shapes are recognised:
//!
//! - **reading-sets**: a JSON object of named reading-sets, each an object of
//!   `field -> value`. One record per set, keyed by the `device_id` attribute. Values
//!   are coerced to numbers where possible, except `TS`.
//! - **positional**: a JSON array whose first element is the storage key and whose
//!   remaining elements are arrays of up to 12 readings, named by [`POSITIONAL_FIELDS`].
//!   Values are kept as sent.
//! - **raw event**: anything else. One record describing the message itself, keyed by
//!   the `device_id` attribute.
//!
//! Decoding never fails: a body that is not a usable sensor payload always falls back to
//! the raw event, so every message produces at least one record.

use crate::domain::{
    coerce_reading, positional_field, reading_as_is, DecodeWarning, FieldValue, InboundMessage,
    KeyedRecord, Record, StorageKey, POSITIONAL_FIELDS,
};
use serde_json::{Map, Value};

pub const SOURCE_MESSAGE_ID_FIELD: &str = "source_message_id";
pub const DEVICE_ID_FIELD: &str = "device_id";
pub const EVENT_FIELD: &str = "event";
pub const DATA_FIELD: &str = "data";
pub const PUBLISHED_AT_FIELD: &str = "published_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    RawEvent,
    ReadingSets,
    Positional,
}

impl PayloadShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawEvent => "raw_event",
            Self::ReadingSets => "reading_sets",
            Self::Positional => "positional",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub shape: PayloadShape,
    pub records: Vec<KeyedRecord>,
    pub warnings: Vec<DecodeWarning>,
}

pub fn decode_message(message: &InboundMessage) -> DecodedMessage {
    let payload: Value = match serde_json::from_slice(&message.body) {
        Ok(value) => value,
        Err(_) => return raw_event(message, Vec::new()),
    };

    let structured = match &payload {
        Value::Object(sets) => Some(decode_reading_sets(message, sets)),
        Value::Array(items) => decode_positional(items),
        _ => None,
    };

    match structured {
        Some(decoded) if !decoded.records.is_empty() => decoded,
        Some(decoded) => raw_event(message, decoded.warnings),
        None => raw_event(message, Vec::new()),
    }
}

/// The record stored for messages that carry no usable sensor payload.
pub fn raw_event_record(message: &InboundMessage) -> Record {
    let mut record = Record::new();
    record.insert(SOURCE_MESSAGE_ID_FIELD, FieldValue::text(message.id.as_str()));
    if let Some(device_id) = message.device_id() {
        record.insert(DEVICE_ID_FIELD, FieldValue::text(device_id));
    }
    if let Some(event) = message.event() {
        record.insert(EVENT_FIELD, FieldValue::text(event));
    }
    record.insert(DATA_FIELD, FieldValue::Text(message.body_text()));
    if let Some(published_at) = message.published_at() {
        record.insert(PUBLISHED_AT_FIELD, FieldValue::text(published_at));
    }
    record
}

fn raw_event(message: &InboundMessage, warnings: Vec<DecodeWarning>) -> DecodedMessage {
    DecodedMessage {
        shape: PayloadShape::RawEvent,
        records: vec![KeyedRecord {
            key: message.device_id().map(StorageKey::from),
            record: raw_event_record(message),
        }],
        warnings,
    }
}

fn decode_reading_sets(message: &InboundMessage, sets: &Map<String, Value>) -> DecodedMessage {
    let key = message.device_id().map(StorageKey::from);
    let mut records = Vec::with_capacity(sets.len());
    let mut warnings = Vec::new();

    for (name, set) in sets {
        let Value::Object(fields) = set else {
            warnings.push(DecodeWarning::ReadingSetNotObject { name: name.clone() });
            continue;
        };

        let record = fields
            .iter()
            .map(|(field, value)| (field.as_str(), coerce_reading(field, value)))
            .collect();

        records.push(KeyedRecord {
            key: key.clone(),
            record,
        });
    }

    DecodedMessage {
        shape: PayloadShape::ReadingSets,
        records,
        warnings,
    }
}

/// `None` when the first element cannot serve as a storage key.
fn decode_positional(items: &[Value]) -> Option<DecodedMessage> {
    let (first, sets) = items.split_first()?;
    let key = match first {
        Value::String(s) => StorageKey::new(s.as_str()),
        Value::Number(n) => StorageKey::new(n.to_string()),
        _ => return None,
    };

    let mut records = Vec::with_capacity(sets.len());
    let mut warnings = Vec::new();

    for (offset, set) in sets.iter().enumerate() {
        let position = offset + 1;
        let Value::Array(readings) = set else {
            warnings.push(DecodeWarning::ReadingSetNotArray { position });
            continue;
        };

        let len = readings.len();
        if len < POSITIONAL_FIELDS.len() {
            warnings.push(DecodeWarning::ShortReadingSet { position, len });
        } else if len > POSITIONAL_FIELDS.len() {
            warnings.push(DecodeWarning::ExtraReadings { position, len });
        }

        let record = readings
            .iter()
            .enumerate()
            .map_while(|(index, value)| Some((positional_field(index)?, reading_as_is(value))))
            .collect();

        records.push(KeyedRecord {
            key: Some(key.clone()),
            record,
        });
    }

    Some(DecodedMessage {
        shape: PayloadShape::Positional,
        records,
        warnings,
    })
}
