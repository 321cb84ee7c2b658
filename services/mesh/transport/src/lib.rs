//! Radio transport seam for the mesh.
//!
//! The radio's discovery and connection machinery lives outside this
//! repository; the mesh core sees it as "connect to a named peer, then push
//! three values over a reliable point-to-point channel": the compressed
//! header length, the payload length, and the packet bytes, in that order,
//! each write independently acknowledged. The receiver treats the final
//! write as the completeness signal.
//!
//! [`mem::MemTransport`] implements the seam in-process for tests and
//! simulation runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod mem;
pub mod neighbor;
pub mod traits;
pub mod writer;

pub use error::TransportError;
pub use mem::{MemTransport, ReceivedTransmission};
pub use neighbor::{Neighbor, NeighborSet};
pub use traits::{RadioSession, RadioTransport};
pub use writer::send_compressed;
