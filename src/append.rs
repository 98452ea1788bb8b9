//! Append engine: sequence claiming and record persistence.
//!
//! An append is three steps:
//! 1. claim `current + 1` with a compare-and-swap on the node's counter,
//!    retrying when another writer wins;
//! 2. store the record under the claimed sequence with create-if-absent;
//! 3. publish the sequence on the node's topic (best-effort).
//!
//! Only step 1 touches shared mutable state, so appends to different nodes
//! never contend.

use crate::bus::NotificationBus;
use crate::config::{ClosePolicy, ServiceConfig};
use crate::error::{Result, StreamError};
use crate::keys;
use crate::kv::{KvStore, Revision};
use crate::types::{EventRecord, NodeId, Sequence};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, trace, warn};

/// Assigns sequences and stores records.
pub struct AppendEngine {
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn NotificationBus>,
    max_payload_bytes: usize,
    close_policy: ClosePolicy,
    record_write_attempts: u32,
}

impl AppendEngine {
    pub fn new(kv: Arc<dyn KvStore>, bus: Arc<dyn NotificationBus>, config: &ServiceConfig) -> Self {
        Self {
            kv,
            bus,
            max_payload_bytes: config.max_payload_bytes,
            close_policy: config.close_policy,
            record_write_attempts: config.record_write_attempts.max(1),
        }
    }

    /// Append a data record; returns its sequence.
    pub fn append(&self, node: &NodeId, content_type: Option<&str>, payload: &[u8]) -> Result<Sequence> {
        if payload.len() > self.max_payload_bytes {
            return Err(StreamError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_bytes,
            });
        }
        let content_type = content_type.map(str::to_string);
        self.commit(node, || EventRecord::data(content_type, payload.to_vec()))
    }

    /// Append a close marker; returns its sequence.
    pub fn append_close(&self, node: &NodeId, reason: Option<&str>) -> Result<Sequence> {
        let reason = reason.map(str::to_string);
        self.commit(node, || EventRecord::close(reason))
    }

    fn commit(&self, node: &NodeId, build: impl FnOnce() -> EventRecord) -> Result<Sequence> {
        let sequence = self.claim(node)?;
        // Stamped after the claim so timestamps follow sequence order.
        let record = build();
        self.store_record(node, sequence, &record)?;
        self.notify(node, sequence);
        Ok(sequence)
    }

    /// Claim the next sequence for `node`.
    fn claim(&self, node: &NodeId) -> Result<Sequence> {
        let key = keys::seq_key(node);
        let mut conflicts = 0u64;

        loop {
            let (current, revision) = self.read_counter(node, &key)?;
            self.check_accepts_appends(node, current)?;

            let next = current.next();
            let value = keys::encode_counter(next);
            let claimed = match revision {
                Some(revision) => self.kv.update(&key, &value, revision),
                None => self.kv.create(&key, &value),
            };

            match claimed {
                Ok(_) => {
                    if conflicts > 0 {
                        trace!(%node, sequence = %next, conflicts, "Claimed after retries");
                    }
                    return Ok(next);
                }
                Err(e) if e.is_contention() => {
                    conflicts += 1;
                    thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Current counter value and the revision to swap against.
    ///
    /// `None` revision means the counter is absent and must be created.
    fn read_counter(&self, node: &NodeId, key: &str) -> Result<(Sequence, Option<Revision>)> {
        match self.kv.get(key)? {
            Some(entry) => match keys::decode_counter(&entry.value) {
                Some(current) => Ok((current, Some(entry.revision))),
                None => {
                    warn!(%node, "Unreadable sequence counter, recovering from records");
                    Ok((self.recover_counter(node)?, Some(entry.revision)))
                }
            },
            None => Ok((self.recover_counter(node)?, None)),
        }
    }

    /// Highest stored sequence of `node`, or zero for a node without history.
    fn recover_counter(&self, node: &NodeId) -> Result<Sequence> {
        let highest = keys::highest_sequence(node, &self.kv.keys(&keys::data_prefix(node))?);
        if highest > Sequence::ZERO {
            debug!(%node, sequence = %highest, "Recovered counter from stored records");
        }
        Ok(highest)
    }

    fn check_accepts_appends(&self, node: &NodeId, current: Sequence) -> Result<()> {
        if self.close_policy != ClosePolicy::Terminal || current == Sequence::ZERO {
            return Ok(());
        }
        // A claim that is still writing its record reads as absent here.
        let Some(entry) = self.kv.get(&keys::data_key(node, current))? else {
            return Ok(());
        };
        match EventRecord::from_json(&entry.value) {
            Ok(last) if last.is_close() => Err(StreamError::NodeClosed(node.clone())),
            _ => Ok(()),
        }
    }

    fn store_record(&self, node: &NodeId, sequence: Sequence, record: &EventRecord) -> Result<()> {
        let key = keys::data_key(node, sequence);
        let value = record.to_json()?;

        let mut last_error = None;
        for attempt in 1..=self.record_write_attempts {
            match self.kv.create(&key, &value) {
                Ok(_) => return Ok(()),
                Err(StreamError::AlreadyExists(_)) => {
                    last_error = Some("a record already exists at the claimed sequence".to_string());
                    break;
                }
                Err(e) => {
                    warn!(%node, %sequence, attempt, error = %e, "Record write failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let reason = last_error.unwrap_or_else(|| "record write failed".to_string());
        error!(
            %node,
            %sequence,
            %reason,
            "Durable-consistency fault: sequence claimed but record not stored"
        );
        Err(StreamError::Consistency {
            node: node.clone(),
            sequence,
            reason,
        })
    }

    fn notify(&self, node: &NodeId, sequence: Sequence) {
        let topic = keys::notify_topic(node);
        if let Err(e) = self.bus.publish(&topic, &keys::encode_notification(sequence)) {
            // Readers re-derive their position from the store on reconnect.
            warn!(%node, %sequence, error = %e, "Notification not published");
        }
    }
}
