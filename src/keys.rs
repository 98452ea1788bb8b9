//! Key and topic layout shared by the registry, the append engine and the reader.

use crate::types::{NodeId, Sequence};

/// Prefix of per-node sequence counter keys.
pub const SEQ_PREFIX: &str = "seq_num.";

/// Prefix of per-(node, sequence) record keys.
pub const DATA_PREFIX: &str = "data.";

/// Prefix of per-node notification topics.
pub const NOTIFY_PREFIX: &str = "notify.";

/// `seq_num.<node>`
pub fn seq_key(node: &NodeId) -> String {
    format!("{SEQ_PREFIX}{node}")
}

/// `data.<node>.<sequence>`
pub fn data_key(node: &NodeId, sequence: Sequence) -> String {
    format!("{DATA_PREFIX}{node}.{}", sequence.0)
}

/// `data.<node>.`, the prefix of every record key of one node.
pub fn data_prefix(node: &NodeId) -> String {
    format!("{DATA_PREFIX}{node}.")
}

/// `notify.<node>`
pub fn notify_topic(node: &NodeId) -> String {
    format!("{NOTIFY_PREFIX}{node}")
}

/// Node named by a counter key, if the key is one.
pub fn node_from_seq_key(key: &str) -> Option<NodeId> {
    key.strip_prefix(SEQ_PREFIX)
        .and_then(|rest| NodeId::new(rest).ok())
}

/// Sequence named by a record key of `node`, if the key is one.
pub fn sequence_from_data_key(node: &NodeId, key: &str) -> Option<Sequence> {
    key.strip_prefix(&data_prefix(node))
        .and_then(|rest| rest.parse::<u64>().ok())
        .map(Sequence)
}

/// Highest sequence among `keys` that are record keys of `node`.
pub fn highest_sequence<S: AsRef<str>>(node: &NodeId, keys: &[S]) -> Sequence {
    keys.iter()
        .filter_map(|key| sequence_from_data_key(node, key.as_ref()))
        .max()
        .unwrap_or(Sequence::ZERO)
}

/// Counters are stored as decimal strings.
pub fn encode_counter(sequence: Sequence) -> Vec<u8> {
    sequence.0.to_string().into_bytes()
}

/// `None` when the stored value is not a decimal integer.
pub fn decode_counter(value: &[u8]) -> Option<Sequence> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Sequence)
}

/// Notifications carry the new sequence as a decimal string.
pub fn encode_notification(sequence: Sequence) -> Vec<u8> {
    encode_counter(sequence)
}

pub fn decode_notification(message: &[u8]) -> Option<Sequence> {
    decode_counter(message)
}
