//! The mesh forwarding engine.
//!
//! On receipt of one packet, from the driver bridge, from the radio after
//! decompression, or from local injection, the engine decides whether the
//! packet is locally destined, relayable to a single known neighbor, or
//! must be flooded; a bounded FIFO of recently seen packets suppresses
//! redundant re-relay.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dedup;
pub mod engine;
pub mod error;

pub use dedup::{DedupCache, DEDUP_CAPACITY};
pub use engine::{Disposition, EngineConfig, ForwardingEngine, LocalStack};
pub use error::ForwardError;
