#![deny(unsafe_code)]

//! mprisline core runtime.
//!
//! Bridges a line-oriented client process to the MPRIS D-Bus interfaces. The
//! client speaks a plain text protocol over a pair of pipes; this crate holds
//! the line channel, the value codec, the handshake and dispatch engine, the
//! signal relay, and the daemon reactor that ties them together. The bus side
//! is abstracted behind [`BusBackend`] so the reactor can be driven without a
//! session bus.

use std::future::Future;
use std::pin::Pin;

/// Boxed `Send` future returned by [`BusBackend`] methods, which must stay
/// object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Bus backend trait the daemon drives.
pub mod bus;
/// Buffered line reading and writing over the client pipes.
pub mod channel;
/// Text encoding of typed D-Bus values.
pub mod codec;
/// Daemon reactor and control channel commands.
pub mod daemon;
/// Dialogue serialisation and method/property dispatch.
pub mod engine;
/// Opening exchange of every dialogue.
pub mod handshake;
/// MPRIS interface tables and introspection.
pub mod interfaces;
/// Global subscriber setup.
pub mod logging;
/// Signal fetching and shaping.
pub mod relay;

#[cfg(test)]
mod testing;

pub use bus::{BusBackend, BusError};
pub use channel::{ChannelError, LineChannel, LineReader, LineWriter};
pub use codec::{CodecError, Signature, StructuredValue};
pub use daemon::{ControlCommand, Daemon, DaemonError};
pub use engine::{DispatchError, Operation, ProtocolEngine};
pub use interfaces::InterfaceSpec;
pub use relay::{OutboundSignal, PendingSignals};
