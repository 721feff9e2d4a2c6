use crate::domain::FieldValue;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const DEVICE_ID_ATTRIBUTE: &str = "device_id";
pub const EVENT_ATTRIBUTE: &str = "event";
pub const PUBLISHED_AT_ATTRIBUTE: &str = "published_at";

/// A message as delivered by the queue, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub id: String,
    pub attributes: HashMap<String, String>,
    pub body: Bytes,
}

impl InboundMessage {
    pub fn new(id: impl Into<String>, attributes: HashMap<String, String>, body: Bytes) -> Self {
        Self {
            id: id.into(),
            attributes,
            body,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.attribute(DEVICE_ID_ATTRIBUTE)
    }

    pub fn event(&self) -> Option<&str> {
        self.attribute(EVENT_ATTRIBUTE)
    }

    pub fn published_at(&self) -> Option<&str> {
        self.attribute(PUBLISHED_AT_ATTRIBUTE)
    }

    /// Body as text. Invalid UTF-8 sequences are replaced, never rejected.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Address of a stored record. Writing twice to the same key overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// One stored document: field name to reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, FieldValue>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A decoded record and where it should be written. `key` is `None` only for a raw
/// event whose message had no `device_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRecord {
    pub key: Option<StorageKey>,
    pub record: Record,
}
