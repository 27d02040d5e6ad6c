//! Transport adapter between the orchestration layer and the remote chat service.
//!
//! `ChatTransport` is the only seam through which the session layer talks to
//! the outside world. `MemoryTransport` is an in-process implementation with
//! scripted behavior, used by tests and by the demo binary.

pub mod client;
pub mod error;
pub mod memory;

pub use client::{ChatChunk, ChatTransport, ChunkStream, StreamRequest};
pub use error::TransportError;
pub use memory::{CallCounts, Endpoint, MemoryTransport, StreamFeed, StreamMode};
