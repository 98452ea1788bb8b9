//! # Tail Log
//!
//! Per-node append-only event logs over a key-value store, with live tailing
//! through a notification bus.
//!
//! ## Core Concepts
//!
//! - **Nodes**: Independent logs, open while their sequence counter exists
//! - **Records**: Data or close markers stored under gap-free sequences
//! - **Appends**: Compare-and-swap sequence claims, then create-if-absent writes
//! - **Streams**: Replay of stored history followed by live tailing
//!
//! ## Example
//!
//! ```ignore
//! use taillog::{LogService, ReaderOptions, ServiceConfig};
//!
//! let service = LogService::in_memory(ServiceConfig::default())?;
//! let node = service.open_node()?;
//!
//! service.append(&node, Some("text/plain"), b"hello")?;
//! service.append_close(&node, Some("done"))?;
//!
//! let mut stream = service.stream(&node, ReaderOptions::default())?;
//! while let Some(frame) = stream.next_frame(Some(Duration::from_secs(1)))? {
//!     println!("{} {:?}", frame.sequence, frame.payload_bytes());
//! }
//! ```

pub mod append;
pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod keys;
pub mod kv;
pub mod reader;
pub mod registry;
pub mod service;
pub mod session;
pub mod types;

// Re-exports
pub use append::AppendEngine;
pub use bus::{BusConfig, BusSubscription, LocalBus, NotificationBus, SubscriptionId};
pub use cache::RecordCache;
pub use config::{ClosePolicy, ServiceConfig};
pub use error::{Result, StreamError};
pub use kv::{FileKv, FileKvConfig, KvEntry, KvStore, MemoryKv, Revision, MAX_KEY_LEN};
pub use reader::{CancelHandle, Phase, ReaderOptions, ReplayTailReader, StartFrom, TailStream};
pub use registry::NodeRegistry;
pub use service::LogService;
pub use session::StreamSession;
pub use types::*;
