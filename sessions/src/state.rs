//! Session state types.
//!
//! [`Session`] is the in-memory record handled during one request.
//! [`PersistedDocument`] is its stored form. Values never leave the server:
//! the cookie only carries the encoded [`SessionId`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::CodecError;
use crate::config::SessionOptions;
use crate::constants::MODIFIED_KEY;
use crate::error::{Result, SessionError};

// ═══════════════════════════════════════════════════════════════════════
// Identifier
// ═══════════════════════════════════════════════════════════════════════

/// 12-byte, time-ordered session identifier.
///
/// Layout: 4-byte big-endian unix seconds, 5 bytes of per-process
/// randomness, 3-byte big-endian counter. Rendered as 24 lowercase hex
/// characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; 12]);

static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

impl SessionId {
    /// Length of the hex rendering.
    pub const HEX_LEN: usize = 24;

    /// Generate a new identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Generate a new identifier stamped with `time`.
    #[must_use]
    pub fn at(time: DateTime<Utc>) -> Self {
        let process = PROCESS_UNIQUE.get_or_init(|| {
            let mut bytes = [0u8; 5];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        });
        let counter = COUNTER
            .get_or_init(|| AtomicU32::new(rand::thread_rng().gen_range(0..0x00FF_FFFF)))
            .fetch_add(1, Ordering::Relaxed)
            & 0x00FF_FFFF;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let seconds = time.timestamp().clamp(0, i64::from(u32::MAX)) as u32;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(process);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Parse a 24-character hex identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidIdentifier`] if `hex` is not exactly 24
    /// hex characters.
    pub fn parse(hex: &str) -> Result<Self> {
        if hex.len() != Self::HEX_LEN {
            return Err(SessionError::InvalidIdentifier(hex.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|_| SessionError::InvalidIdentifier(hex.to_string()))?;
        Ok(Self(bytes))
    }

    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creation time embedded in the identifier (second precision).
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        let seconds = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(i64::from(seconds), 0).unwrap_or_default()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::parse(&hex).map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Values
// ═══════════════════════════════════════════════════════════════════════

/// A value stored in a session.
///
/// Timestamps are a distinct variant so the reserved `modified` key can be
/// checked by type instead of by inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SessionValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Arbitrary structured data.
    Json(serde_json::Value),
}

impl SessionValue {
    /// Type tag, as used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }

    /// Text content, if this is a text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Timestamp content, if this is a timestamp value.
    #[must_use]
    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(time) => Some(*time),
            _ => None,
        }
    }
}

impl From<bool> for SessionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SessionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SessionValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for SessionValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SessionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for SessionValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<serde_json::Value> for SessionValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Session payload: string keys to tagged values.
pub type SessionValues = BTreeMap<String, SessionValue>;

// ═══════════════════════════════════════════════════════════════════════
// Session Record
// ═══════════════════════════════════════════════════════════════════════

/// One user's session during a request.
///
/// Created by [`SessionStore::new_session`](crate::SessionStore::new_session)
/// or [`SessionRegistry::get`](crate::SessionRegistry::get), mutated by the
/// handler, persisted by [`SessionStore::save`](crate::SessionStore::save).
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    name: String,

    /// Hex identifier. `None` until the first save.
    ///
    /// Kept as text so a malformed id from the caller is reported on save
    /// rather than lost.
    pub id: Option<String>,

    /// Session payload.
    pub values: SessionValues,

    /// `true` if no stored record backs this session.
    pub is_new: bool,

    /// Cookie and lifetime options for this session.
    pub options: SessionOptions,
}

impl Session {
    /// Create an empty, new session named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            name: name.into(),
            id: None,
            values: SessionValues::new(),
            is_new: true,
            options,
        }
    }

    /// Cookie name this session is bound to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SessionValue> {
        self.values.get(key)
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<SessionValue>,
    ) -> Option<SessionValue> {
        self.values.insert(key.into(), value.into())
    }

    /// Remove the value under `key`.
    pub fn remove(&mut self, key: &str) -> Option<SessionValue> {
        self.values.remove(key)
    }

    /// Pin the persisted `modified` timestamp, which is the TTL expiry basis.
    pub fn set_modified(&mut self, at: DateTime<Utc>) {
        self.values
            .insert(MODIFIED_KEY.to_string(), SessionValue::Timestamp(at));
    }

    /// Mark the session for deletion on the next save.
    pub fn expire(&mut self) {
        self.options.max_age = -1;
    }

    /// Check that every value survives the stored encoding unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] naming the first key that holds a
    /// NaN or infinite float.
    pub fn check_values(&self) -> Result<()> {
        match self
            .values
            .iter()
            .find(|(_, value)| matches!(value, SessionValue::Float(f) if !f.is_finite()))
        {
            Some((key, _)) => Err(SessionError::Encode(CodecError::Serialize(format!(
                "non-finite float under key `{key}`"
            )))),
            None => Ok(()),
        }
    }

    /// Timestamp to persist: the pinned `modified` value, or `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidModifiedValue`] if the reserved key
    /// holds anything other than a timestamp.
    pub fn modified_or(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self.values.get(MODIFIED_KEY) {
            None => Ok(now),
            Some(SessionValue::Timestamp(at)) => Ok(*at),
            Some(other) => Err(SessionError::InvalidModifiedValue {
                found: other.type_name(),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Stored Forms
// ═══════════════════════════════════════════════════════════════════════

/// Stored form of a session.
///
/// `data` is codec output and must only be read through the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDocument {
    /// Primary key.
    pub id: SessionId,

    /// Encoded session values.
    pub data: String,

    /// Audit timestamp and TTL index field.
    pub modified: DateTime<Utc>,
}

/// Index definition or description on the session collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,

    /// Indexed field, if the index covers a single field.
    pub field: Option<String>,

    /// Documents expire this long after the indexed timestamp.
    pub expire_after: Option<Duration>,

    /// Skip documents lacking the field.
    pub sparse: bool,

    /// Build without blocking other operations.
    pub background: bool,
}

impl IndexSpec {
    /// Sparse, background TTL index on `field`.
    #[must_use]
    pub fn ttl(name: impl Into<String>, field: impl Into<String>, expire_after: Duration) -> Self {
        Self {
            name: name.into(),
            field: Some(field.into()),
            expire_after: Some(expire_after),
            sparse: true,
            background: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_id_hex_roundtrip() {
        let id = SessionId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), SessionId::HEX_LEN);
        assert_eq!(SessionId::parse(&hex), Ok(id));
    }

    #[test]
    fn test_session_id_rejects_malformed() {
        assert!(matches!(
            SessionId::parse("abc123"),
            Err(SessionError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            SessionId::parse("zzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(SessionError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_session_id_serializes_as_hex() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        assert_eq!(serde_json::from_str::<SessionId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<SessionId>("\"not-an-id\"").is_err());
    }

    #[test]
    fn test_persisted_document_json() {
        let document = PersistedDocument {
            id: SessionId::new(),
            data: "encoded".to_string(),
            modified: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&document).unwrap();
        assert_eq!(json["id"], document.id.to_hex());

        let back: PersistedDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, document);
    }

    #[test]
    fn test_session_ids_are_unique_and_time_ordered() {
        let earlier = SessionId::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let later = SessionId::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(earlier < later);
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_session_id_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 15).unwrap();
        assert_eq!(SessionId::at(at).timestamp(), at);
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = Session::new("app", SessionOptions::default());
        assert_eq!(session.name(), "app");
        assert!(session.is_new);
        assert!(session.id.is_none());
        assert!(session.values.is_empty());
    }

    #[test]
    fn test_modified_defaults_to_now() {
        let session = Session::new("app", SessionOptions::default());
        let now = Utc::now();
        assert_eq!(session.modified_or(now), Ok(now));
    }

    #[test]
    fn test_pinned_modified() {
        let mut session = Session::new("app", SessionOptions::default());
        let pinned = Utc.with_ymd_and_hms(2024, 2, 29, 8, 0, 0).unwrap();
        session.set_modified(pinned);
        assert_eq!(session.modified_or(Utc::now()), Ok(pinned));
    }

    #[test]
    fn test_non_timestamp_modified_rejected() {
        let mut session = Session::new("app", SessionOptions::default());
        session.insert(MODIFIED_KEY, "yesterday");
        assert_eq!(
            session.modified_or(Utc::now()),
            Err(SessionError::InvalidModifiedValue { found: "text" })
        );
    }

    #[test]
    fn test_non_finite_floats_rejected() {
        let mut session = Session::new("app", SessionOptions::default());
        session.insert("ratio", 0.5);
        assert_eq!(session.check_values(), Ok(()));

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            session.insert("score", bad);
            let err = session.check_values().unwrap_err();
            assert!(matches!(err, SessionError::Encode(CodecError::Serialize(ref msg)) if msg.contains("score")));
        }
    }

    #[test]
    fn test_expire_marks_for_deletion() {
        let mut session = Session::new("app", SessionOptions::default());
        session.expire();
        assert!(session.options.is_expired());
    }

    #[test]
    fn test_value_serialization_is_tagged() {
        let json = serde_json::to_string(&SessionValue::Int(7)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":7}"#);

        let json = serde_json::to_string(&SessionValue::Null).unwrap();
        assert_eq!(json, r#"{"type":"null"}"#);
    }
}
