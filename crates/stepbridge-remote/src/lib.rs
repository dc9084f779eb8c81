//! TCP proxy pair exposing an RL environment to a learner in another
//! process.
//!
//! - [`array`]: dtype-tagged little-endian array payloads
//! - [`protocol`]: envelopes, commands and [`ProxyError`]
//! - [`framing`]: 4-byte LE length-prefixed frames
//! - [`poll`]: readiness waits bounded by a total time budget
//! - [`server`]: [`EnvironmentServer`] dispatching to any `RlEnvironment`
//! - [`client`]: [`EnvironmentClient`] with one method per command
//!
//! The protocol is strictly request/response with one request in flight.

pub mod array;
pub mod client;
pub mod connection;
pub mod framing;
pub mod poll;
pub mod protocol;
pub mod server;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use array::{ArrayError, ArrayPayload, DType};
pub use client::EnvironmentClient;
pub use poll::PollBudget;
pub use protocol::{Command, DEFAULT_PORT, Envelope, MAX_MESSAGE_SIZE, Message, ProxyError};
pub use server::{EnvironmentServer, HandlerError};

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ArrayPayload, DType, EnvironmentClient, EnvironmentServer, PollBudget, ProxyError,
        protocol::{Command, DEFAULT_PORT, Envelope, Message},
    };
}
