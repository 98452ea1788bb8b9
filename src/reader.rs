//! Replay-then-tail reader.
//!
//! A [`TailStream`] delivers a node's records in sequence order: first the
//! history up to the counter value seen when the stream opened (the replay
//! bound), then records as their notifications arrive. The subscription is
//! taken out *before* the bound is read, so a record appended in between is
//! both inside the buffered notifications and possibly inside the replay range;
//! the stream tracks the next sequence it owes the consumer and ignores
//! anything below it, which makes the seam gap-free and duplicate-free.
//!
//! Notifications only say "sequence N exists". The stream always reads the
//! record from the store, and delivers every sequence up to the highest one
//! announced so far, so lost or reordered notifications cost latency, not
//! correctness.

use crate::bus::{BusSubscription, NotificationBus};
use crate::cache::RecordCache;
use crate::error::{Result, StreamError};
use crate::keys;
use crate::kv::KvStore;
use crate::types::{EventRecord, Frame, NodeId, Sequence};
use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Where a stream starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartFrom {
    /// Sequence 1.
    #[default]
    Beginning,
    /// A given sequence (at least 1).
    Sequence(Sequence),
    /// Just after the replay bound: live events only.
    ///
    /// A consumer that reconnects this way loses whatever was appended while
    /// it was away.
    Live,
}

/// Per-stream options.
#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    pub start: StartFrom,

    /// End the stream after delivering a close-record.
    pub end_at_close: bool,
}

impl ReaderOptions {
    pub fn from_sequence(sequence: Sequence) -> Self {
        Self {
            start: StartFrom::Sequence(sequence),
            ..Default::default()
        }
    }

    pub fn live() -> Self {
        Self {
            start: StartFrom::Live,
            ..Default::default()
        }
    }

    pub fn with_end_at_close(mut self, end_at_close: bool) -> Self {
        self.end_at_close = end_at_close;
        self
    }
}

/// Stream state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Delivering history up to the replay bound.
    Replaying,
    /// Delivering records as they are announced.
    Tailing,
    /// Ended; every further call reports `EndOfStream`.
    Finished,
}

/// Stops a stream from another thread.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Full means a cancel is already pending.
        let _ = self.sender.try_send(());
    }
}

/// Opens replay-then-tail streams.
pub struct ReplayTailReader {
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn NotificationBus>,
    cache: Arc<RecordCache>,
    gap_timeout: Duration,
}

impl ReplayTailReader {
    pub fn new(
        kv: Arc<dyn KvStore>,
        bus: Arc<dyn NotificationBus>,
        cache: Arc<RecordCache>,
        gap_timeout: Duration,
    ) -> Self {
        Self {
            kv,
            bus,
            cache,
            gap_timeout,
        }
    }

    /// Subscribe to `node`, then capture its replay bound.
    pub fn open(&self, node: &NodeId, options: ReaderOptions) -> Result<TailStream> {
        let subscription = self.bus.subscribe(&keys::notify_topic(node))?;
        let bound = self.replay_bound(node)?;

        let next = match options.start {
            StartFrom::Beginning => Sequence(1),
            StartFrom::Sequence(Sequence(0)) => {
                return Err(StreamError::InvalidSequence(
                    "streams start at sequence 1 or later".into(),
                ))
            }
            StartFrom::Sequence(s) => s,
            StartFrom::Live => bound.next(),
        };

        let (cancel_tx, cancel_rx) = bounded(1);
        debug!(%node, bound = %bound, start = %next, "Opened stream");

        Ok(TailStream {
            node: node.clone(),
            cache: Arc::clone(&self.cache),
            subscription,
            cancel_tx,
            cancel_rx,
            bound,
            next,
            announced: bound,
            phase: if next > bound {
                Phase::Tailing
            } else {
                Phase::Replaying
            },
            gap_since: None,
            opened: Instant::now(),
            gap_timeout: self.gap_timeout,
            end_at_close: options.end_at_close,
            bus_lost: false,
        })
    }

    /// The node's counter, or its highest stored record once the counter is
    /// gone (a closed node still replays its history).
    fn replay_bound(&self, node: &NodeId) -> Result<Sequence> {
        if let Some(entry) = self.kv.get(&keys::seq_key(node))? {
            if let Some(bound) = keys::decode_counter(&entry.value) {
                return Ok(bound);
            }
            warn!(%node, "Unreadable sequence counter, deriving bound from records");
        }
        Ok(keys::highest_sequence(
            node,
            &self.kv.keys(&keys::data_prefix(node))?,
        ))
    }
}

enum Fetch {
    Found(Arc<EventRecord>),
    Skip,
    Pending,
}

enum Wake {
    Notification(Option<Vec<u8>>),
    Cancelled,
    Timer,
}

/// One consumer's replay-then-tail run.
///
/// Holds the bus subscription; dropping the stream unsubscribes.
pub struct TailStream {
    node: NodeId,
    cache: Arc<RecordCache>,
    subscription: BusSubscription,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    /// Counter value captured at open.
    bound: Sequence,
    /// Next sequence owed to the consumer.
    next: Sequence,
    /// Highest sequence known to exist.
    announced: Sequence,
    phase: Phase,
    /// When `next` was first found missing.
    gap_since: Option<Instant>,
    /// Gaps at or below the bound are timed from here, so old gaps cost at
    /// most one `gap_timeout` per stream.
    opened: Instant,
    gap_timeout: Duration,
    end_at_close: bool,
    bus_lost: bool,
}

impl TailStream {
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn replay_bound(&self) -> Sequence {
        self.bound
    }

    /// Next sequence the stream will deliver.
    pub fn next_sequence(&self) -> Sequence {
        self.next
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            sender: self.cancel_tx.clone(),
        }
    }

    /// Wait for the next frame.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first. Ends with
    /// `EndOfStream` (close-record with `end_at_close`), `Cancelled`, or
    /// `SubscriptionClosed` (bus dropped the subscription or shut down);
    /// after any error the stream stays finished.
    pub fn next_frame(&mut self, timeout: Option<Duration>) -> Result<Option<Frame>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let result = self.poll(deadline);
        if let Err(ref e) = result {
            if self.phase != Phase::Finished {
                debug!(node = %self.node, error = %e, "Stream ended");
                self.phase = Phase::Finished;
            }
        }
        result
    }

    fn poll(&mut self, deadline: Option<Instant>) -> Result<Option<Frame>> {
        loop {
            if self.phase == Phase::Finished {
                return Err(StreamError::EndOfStream);
            }
            if self.cancel_rx.try_recv().is_ok() {
                return Err(StreamError::Cancelled);
            }
            self.drain_notifications();
            if self.phase == Phase::Replaying && self.next > self.bound {
                self.enter_tailing();
            }

            if self.next <= self.announced {
                match self.fetch(self.next)? {
                    Fetch::Found(record) => return Ok(Some(self.deliver(&record))),
                    Fetch::Skip => {
                        self.advance();
                        continue;
                    }
                    Fetch::Pending => {}
                }
            } else if self.bus_lost {
                return Err(StreamError::SubscriptionClosed(format!(
                    "notifications for node {} stopped",
                    self.node
                )));
            }

            let now = Instant::now();
            let mut wait = match deadline {
                Some(d) if now >= d => return Ok(None),
                Some(d) => Some(d - now),
                None => None,
            };
            if let Some(since) = self.gap_since {
                let left = self.gap_timeout.saturating_sub(since.elapsed());
                wait = Some(wait.map_or(left, |w| w.min(left)));
            }

            let timer = wait.map(after).unwrap_or_else(never);
            let notifications = if self.bus_lost {
                never()
            } else {
                self.subscription.receiver().clone()
            };
            let cancel = self.cancel_rx.clone();

            let wake = select! {
                recv(notifications) -> msg => Wake::Notification(msg.ok()),
                recv(cancel) -> _ => Wake::Cancelled,
                recv(timer) -> _ => Wake::Timer,
            };
            match wake {
                Wake::Notification(Some(message)) => self.on_notification(&message),
                Wake::Notification(None) => self.bus_lost = true,
                Wake::Cancelled => return Err(StreamError::Cancelled),
                Wake::Timer => {}
            }
        }
    }

    fn drain_notifications(&mut self) {
        if self.bus_lost {
            return;
        }
        loop {
            match self.subscription.try_recv() {
                Ok(message) => self.on_notification(&message),
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    self.bus_lost = true;
                    break;
                }
            }
        }
    }

    fn on_notification(&mut self, message: &[u8]) {
        match keys::decode_notification(message) {
            Some(sequence) if sequence > self.announced => self.announced = sequence,
            Some(sequence) => {
                trace!(node = %self.node, %sequence, "Already known");
            }
            None => {
                warn!(node = %self.node, "Ignoring malformed notification");
            }
        }
    }

    fn fetch(&mut self, sequence: Sequence) -> Result<Fetch> {
        match self.cache.get(&self.node, sequence) {
            Ok(Some(record)) => Ok(Fetch::Found(record)),
            Ok(None) => {
                // May be a claim whose record is still being written.
                let start = if sequence <= self.bound {
                    self.opened
                } else {
                    Instant::now()
                };
                let since = *self.gap_since.get_or_insert(start);
                if since.elapsed() >= self.gap_timeout {
                    warn!(node = %self.node, %sequence, "Skipping missing record");
                    Ok(Fetch::Skip)
                } else {
                    Ok(Fetch::Pending)
                }
            }
            Err(
                e @ (StreamError::Deserialization(_)
                | StreamError::Corruption(_)
                | StreamError::ChecksumMismatch { .. }
                | StreamError::InvalidFormat(_)),
            ) => {
                warn!(node = %self.node, %sequence, error = %e, "Skipping unreadable record");
                Ok(Fetch::Skip)
            }
            Err(e) => Err(e),
        }
    }

    fn deliver(&mut self, record: &EventRecord) -> Frame {
        let frame = Frame::new(self.next, record.clone());
        self.advance();

        if self.phase == Phase::Replaying && self.next > self.bound {
            self.enter_tailing();
        }
        if self.end_at_close && frame.is_close() {
            debug!(node = %self.node, sequence = %frame.sequence, "Producer ended stream");
            self.phase = Phase::Finished;
        }
        frame
    }

    fn advance(&mut self) {
        self.next = self.next.next();
        self.gap_since = None;
    }

    fn enter_tailing(&mut self) {
        trace!(node = %self.node, bound = %self.bound, "Replay complete, tailing");
        self.phase = Phase::Tailing;
    }
}

impl Iterator for TailStream {
    type Item = Result<Frame>;

    /// Blocks until the next frame; `None` once the stream has ended
    /// normally (close-record or cancel).
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_frame(None) {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) | Err(StreamError::EndOfStream) | Err(StreamError::Cancelled) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
