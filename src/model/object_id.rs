use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Key under which the document store keeps a canonical identifier.
pub const OID_KEY: &str = "$oid";

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Store-native 12-byte identifier, rendered as 24 lowercase hex digits.
///
/// Layout follows the usual object-id convention: 4 bytes of big-endian
/// seconds since the epoch, 5 random bytes, 3 bytes of a process-wide counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectIdError {
    #[error("expected 24 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("identifier contains non-hex characters")]
    InvalidHex,
}

impl ObjectId {
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let secs = chrono::Utc::now().timestamp() as u32;
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        let random = uuid::Uuid::new_v4();
        bytes[4..9].copy_from_slice(&random.as_bytes()[..5]);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Parse a 24 hex digit rendering. Upper and lower case are both accepted.
    pub fn parse_str(raw: &str) -> Result<Self, ObjectIdError> {
        if raw.len() != 24 {
            return Err(ObjectIdError::InvalidLength(raw.len()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(raw, &mut bytes).map_err(|_| ObjectIdError::InvalidHex)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The canonical document form, `{"$oid": "<hex>"}`.
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::json!({ OID_KEY: self.to_hex() })
    }

    /// Read a canonical document form. Plain strings are not canonical and yield `None`.
    pub fn from_document(value: &serde_json::Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.len() != 1 {
            return None;
        }
        map.get(OID_KEY)?
            .as_str()
            .and_then(|raw| Self::parse_str(raw).ok())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(OID_KEY, &self.to_hex())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Canonical {
            #[serde(rename = "$oid")]
            oid: String,
        }

        let canonical = Canonical::deserialize(deserializer)?;
        ObjectId::parse_str(&canonical.oid).map_err(de::Error::custom)
    }
}

/// An identifier as it may have been persisted over the life of a document:
/// either the canonical `{"$oid": ..}` form or a bare string rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredId {
    Canonical(ObjectId),
    Plain(String),
}

impl StoredId {
    pub fn render(&self) -> String {
        match self {
            StoredId::Canonical(oid) => oid.to_hex(),
            StoredId::Plain(raw) => raw.clone(),
        }
    }
}
