/// `link/` - connection to the remote scene engine
///
/// session (socket) → registry (correlation) → client (typed commands).
/// `protocol` holds the wire envelopes shared by all three.
pub mod client;
pub mod protocol;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{CommandClient, UNBOUNDED_DEPTH};
pub use protocol::{ComponentData, Member, Request, Response, SlotData, SlotPatch};
pub use registry::{CorrelationRegistry, PendingHandle};
pub use session::{ConnectionState, Session, SessionEvent, SessionStatus};
