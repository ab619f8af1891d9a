//! Core engine for a networked, rotationally-durable key/value cache:
//! the store, journal/rotation, protocol scanner, watcher registry, loop
//! analyzer, pub queue, and processor that together implement its
//! mutation/notification semantics independent of any transport.

pub mod error;
pub mod journal;
pub mod loop_analyzer;
pub mod processor;
pub mod protocol;
pub mod pub_queue;
pub mod registry;
pub mod store;

pub use error::{Result, VortexError};
pub use journal::Journal;
pub use processor::{LiveProcessor, Processor, ReplayProcessor};
pub use protocol::Operation;
pub use pub_queue::PubQueue;
pub use registry::{Registry, Watcher};
pub use store::Store;
