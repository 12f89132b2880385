//! The seam between the daemon and the message bus it serves.

use std::sync::Arc;

use crate::engine::ProtocolEngine;
use crate::relay::OutboundSignal;
use crate::BoxFuture;

/// A bus service the daemon can switch on and off and emit signals through.
///
/// While started, the backend answers bus requests by running dialogues on
/// the shared [`ProtocolEngine`].
pub trait BusBackend: Send {
    /// Claim the bus name and begin serving requests.
    fn start(&mut self, engine: Arc<ProtocolEngine>) -> BoxFuture<'_, Result<(), BusError>>;

    /// Stop serving, release the name, and drop the connection.
    fn stop(&mut self) -> BoxFuture<'_, Result<(), BusError>>;

    fn is_running(&self) -> bool;

    /// Put one relayed signal on the bus.
    fn emit<'a>(&'a self, signal: &'a OutboundSignal) -> BoxFuture<'a, Result<(), BusError>>;
}

/// Errors from a [`BusBackend`].
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("could not acquire bus name {name}: {reason}")]
    NameUnavailable { name: String, reason: String },

    #[error("service is not running")]
    NotRunning,

    #[error("signal {member} could not be emitted: {reason}")]
    Emit { member: String, reason: String },
}
