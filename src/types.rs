//! Core types for the node log.

use crate::error::{Result, StreamError};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound (exclusive) for randomly chosen node identities.
const RANDOM_NODE_SPACE: u64 = 1_000_000;

/// Longest accepted identity, in bytes. Keeps every derived key within what
/// the file store can name.
pub const MAX_NODE_ID_LEN: usize = 64;

/// Identity of an open node.
///
/// Opaque to the log. It becomes part of store keys and bus topics, so it may
/// not be empty, may not exceed [`MAX_NODE_ID_LEN`] bytes, and may not contain
/// the `.` separator or whitespace.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Validate and wrap an identity.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty()
            || id.len() > MAX_NODE_ID_LEN
            || id.contains('.')
            || id.chars().any(char::is_whitespace)
        {
            return Err(StreamError::InvalidNode(id));
        }
        Ok(NodeId(id))
    }

    /// Pick a random decimal identity in `[0, 1_000_000)`.
    ///
    /// Collisions are possible; the registry reports them as `AlreadyExists`.
    pub fn random() -> Self {
        let n = rand::rng().random_range(0..RANDOM_NODE_SPACE);
        NodeId(n.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for NodeId {
    fn from(n: u64) -> Self {
        NodeId(n.to_string())
    }
}

impl FromStr for NodeId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        NodeId::new(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = StreamError;

    fn try_from(s: String) -> Result<Self> {
        NodeId::new(s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 1-based position of an event in a node's log. `Sequence(0)` means
/// "nothing appended yet".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub const ZERO: Sequence = Sequence(0);

    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(Sequence(self.0 - 1))
        } else {
            None
        }
    }
}

/// Binary event payload.
///
/// Human-readable formats (JSON) carry it as a hex string, binary formats
/// (MessagePack) as raw bytes.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload(bytes.to_vec())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(&s).map(Payload).map_err(de::Error::custom)
        } else {
            deserializer.deserialize_byte_buf(PayloadVisitor)
        }
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("payload bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Payload, E> {
        Ok(Payload(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Payload, E> {
        Ok(Payload(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Payload, E> {
        hex::decode(v).map(Payload).map_err(E::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Payload, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        Ok(Payload(bytes))
    }
}

/// Metadata attached to every record by the append engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// When the record was written.
    pub timestamp: DateTime<Utc>,

    /// Caller-supplied content label.
    #[serde(rename = "Content-Type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Close-records only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// An immutable record stored at `(node, sequence)`.
///
/// A record with no payload is a close marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub metadata: EventMetadata,
    pub payload: Option<Payload>,
}

impl EventRecord {
    /// A data record stamped with the current time.
    pub fn data(content_type: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            metadata: EventMetadata {
                timestamp: Utc::now(),
                content_type,
                reason: None,
            },
            payload: Some(Payload(payload)),
        }
    }

    /// A close marker stamped with the current time.
    pub fn close(reason: Option<String>) -> Self {
        Self {
            metadata: EventMetadata {
                timestamp: Utc::now(),
                content_type: None,
                reason,
            },
            payload: None,
        }
    }

    pub fn is_close(&self) -> bool {
        self.payload.is_none()
    }

    /// Payload bytes; empty for a close marker.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_ref().map(Payload::as_bytes).unwrap_or(&[])
    }

    /// JSON encoding used in the key-value store.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| StreamError::Deserialization(e.to_string()))
    }
}

/// Wire envelope for frames pushed to consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeFormat {
    #[default]
    Json,
    Msgpack,
}

impl FromStr for EnvelopeFormat {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(EnvelopeFormat::Json),
            "msgpack" => Ok(EnvelopeFormat::Msgpack),
            other => Err(StreamError::Config(format!("unknown envelope format {other:?}"))),
        }
    }
}

/// A record as delivered to a consumer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub sequence: Sequence,
    pub metadata: EventMetadata,
    pub payload: Option<Payload>,
}

impl Frame {
    pub fn new(sequence: Sequence, record: EventRecord) -> Self {
        Self {
            sequence,
            metadata: record.metadata,
            payload: record.payload,
        }
    }

    pub fn is_close(&self) -> bool {
        self.payload.is_none()
    }

    /// Payload bytes; empty for a close frame.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_ref().map(Payload::as_bytes).unwrap_or(&[])
    }

    pub fn encode(&self, format: EnvelopeFormat) -> Result<Vec<u8>> {
        match format {
            EnvelopeFormat::Json => Ok(serde_json::to_vec(self)?),
            EnvelopeFormat::Msgpack => Ok(rmp_serde::to_vec_named(self)?),
        }
    }

    pub fn decode(bytes: &[u8], format: EnvelopeFormat) -> Result<Self> {
        match format {
            EnvelopeFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| StreamError::Deserialization(e.to_string())),
            EnvelopeFormat::Msgpack => Ok(rmp_serde::from_slice(bytes)?),
        }
    }
}
