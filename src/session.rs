//! Stream sessions: a [`TailStream`] driven on its own thread.
//!
//! The session thread pushes frames into a bounded channel; the consumer reads
//! them at its own pace. Either side can end the session: the consumer by
//! cancelling or dropping it, the stream by finishing. Nothing is shared with
//! other sessions except the store and the bus.

use crate::error::{Result, StreamError};
use crate::reader::{CancelHandle, TailStream};
use crate::types::{Frame, NodeId};
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// Handle to a running replay-then-tail session.
///
/// Dropping it cancels the session.
pub struct StreamSession {
    node: NodeId,
    frames: Receiver<Result<Frame>>,
    cancel: CancelHandle,
    worker: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Run `stream` on a new thread, buffering up to `buffer` frames.
    pub fn spawn(mut stream: TailStream, buffer: usize) -> Result<Self> {
        let node = stream.node().clone();
        let cancel = stream.cancel_handle();
        let (sender, frames) = bounded(buffer.max(1));

        let worker = thread::Builder::new()
            .name(format!("tail-{node}"))
            .spawn(move || {
                let node = stream.node().clone();
                loop {
                    let item = match stream.next_frame(None) {
                        Ok(Some(frame)) => Ok(frame),
                        Ok(None) => continue,
                        Err(StreamError::Cancelled) => break,
                        Err(e) => Err(e),
                    };
                    let ended = item.is_err();
                    if sender.send(item).is_err() {
                        trace!(%node, "Consumer went away");
                        break;
                    }
                    if ended {
                        break;
                    }
                }
                debug!(%node, "Session finished");
            })?;

        Ok(Self {
            node,
            frames,
            cancel,
            worker: Some(worker),
        })
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Receive the next item (blocking). `Err` once the session has ended.
    ///
    /// A stream ending with an error delivers that error as its last item,
    /// `EndOfStream` included.
    pub fn recv(&self) -> std::result::Result<Result<Frame>, RecvError> {
        self.frames.recv()
    }

    /// Try to receive an item (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<Result<Frame>, TryRecvError> {
        self.frames.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Result<Frame>, RecvTimeoutError> {
        self.frames.recv_timeout(timeout)
    }

    /// Channel of frames, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<Result<Frame>> {
        &self.frames
    }

    /// Ask the session to stop; buffered frames remain readable.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the session and wait for its thread.
    pub fn close(mut self) {
        self.cancel.cancel();
        let worker = self.worker.take();
        // Dropping the receiver unblocks a worker stuck on a full channel.
        drop(self);
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
