//! Protocol engine: owns the dialogue channel and runs one dialogue at a time.
//!
//! Every D-Bus request and every signal fetch goes through
//! [`ProtocolEngine::try_begin`]. The guard it hands out is the only way to
//! reach the channel, so two dialogues can never interleave their lines. A
//! second request while one is in flight is turned away at once with
//! [`DispatchError::Busy`]; it does not queue and it writes nothing.

use std::fmt;
use std::ops::{Deref, DerefMut};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::channel::{ChannelError, LineSink, LineSource};
use crate::codec::{
    decode_value, encode_arguments, split_typed_line, CodecError, StructuredValue,
};
use crate::handshake::{self, HandshakeError, HandshakeOutcome};
use crate::interfaces::InterfaceSpec;

/// Anything the engine can hold a dialogue over.
pub trait Dialogue: LineSource + LineSink + Send {}

impl<T: LineSource + LineSink + Send> Dialogue for T {}

/// The three request kinds a bus caller can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Method,
    GetProperty,
    SetProperty,
}

impl Operation {
    /// Second half of the intent line and the expected acknowledgement.
    pub fn ack(self) -> &'static str {
        match self {
            Operation::Method => "method",
            Operation::GetProperty => "getproperty",
            Operation::SetProperty => "setproperty",
        }
    }

    pub fn intent(self, iface: &InterfaceSpec) -> String {
        format!("{}:{}", iface.tag, self.ack())
    }
}

/// Which half of the dialogue channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}

/// Why a dialogue did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Another dialogue holds the channel. Nothing was written.
    #[error("another dialogue is already in progress")]
    Busy,

    /// The channel itself failed; the dialogue was cut off mid-way.
    #[error("dialogue channel {direction} failed: {source}")]
    Io {
        direction: Direction,
        #[source]
        source: ChannelError,
    },

    /// `UNSUPPORTED` in place of the acknowledgement.
    #[error("client rejected the operation")]
    Rejected,

    /// `ACK:NA`: nothing to hand over.
    #[error("client has nothing to offer for the operation")]
    Unavailable,

    #[error("expected acknowledgement {expected:?}, got {got:?}")]
    Mismatch { expected: String, got: String },

    #[error(transparent)]
    Codec(CodecError),

    /// `IO ERROR: <text>` from a method call.
    #[error("client reported an I/O error: {0}")]
    ClientIo(String),

    /// `ERROR: <text>` from a method call.
    #[error("client reported an error: {0}")]
    ClientError(String),

    /// A set reply without the `<tags>:ok` colon.
    #[error("expected <head>:<rest>, got {0:?}")]
    MissingSeparator(String),

    /// Anything but `ok` after the tags of a set reply.
    #[error("client did not confirm the property write: {0:?}")]
    SetNotAcknowledged(String),

    #[error("unrecognised method return {0:?}")]
    UnknownReturn(String),

    /// The client answered a property read with a value of another type.
    #[error("property {property} has type {expected}, client sent {got}")]
    WrongType {
        property: String,
        expected: String,
        got: String,
    },
}

impl DispatchError {
    /// The `org.freedesktop.DBus.Error.*` name a bus caller should see.
    pub fn bus_error_name(&self, operation: Operation) -> &'static str {
        match self {
            DispatchError::Busy => match operation {
                Operation::Method => "org.freedesktop.DBus.Error.LimitsExceeded",
                Operation::GetProperty | Operation::SetProperty => {
                    "org.freedesktop.DBus.Error.Failed"
                }
            },
            DispatchError::Io { .. } | DispatchError::ClientIo(_) => {
                "org.freedesktop.DBus.Error.IOError"
            }
            DispatchError::Rejected | DispatchError::Unavailable => {
                "org.freedesktop.DBus.Error.NotSupported"
            }
            DispatchError::UnknownReturn(_) => "org.freedesktop.DBus.Error.UnknownMethod",
            DispatchError::Mismatch { .. }
            | DispatchError::Codec(_)
            | DispatchError::ClientError(_)
            | DispatchError::MissingSeparator(_)
            | DispatchError::SetNotAcknowledged(_)
            | DispatchError::WrongType { .. } => "org.freedesktop.DBus.Error.ServiceUnknown",
        }
    }

    /// Whether the dialogue channel itself is unusable afterwards.
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, DispatchError::Io { .. })
    }

    pub(crate) fn reading(source: ChannelError) -> Self {
        DispatchError::Io {
            direction: Direction::Read,
            source,
        }
    }

    pub(crate) fn writing(source: ChannelError) -> Self {
        DispatchError::Io {
            direction: Direction::Write,
            source,
        }
    }

    pub(crate) fn codec(direction: Direction, err: CodecError) -> Self {
        match err {
            CodecError::Channel(source) => DispatchError::Io { direction, source },
            other => DispatchError::Codec(other),
        }
    }
}

impl From<HandshakeError> for DispatchError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Write(e) => DispatchError::writing(e),
            HandshakeError::Read(e) => DispatchError::reading(e),
            HandshakeError::Mismatch { expected, got } => DispatchError::Mismatch { expected, got },
        }
    }
}

/// Exclusive access to the dialogue channel for the length of one dialogue.
pub struct DialogueGuard<'a>(MutexGuard<'a, Box<dyn Dialogue>>);

impl Deref for DialogueGuard<'_> {
    type Target = dyn Dialogue;

    fn deref(&self) -> &Self::Target {
        &**self.0
    }
}

impl DerefMut for DialogueGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.0
    }
}

impl DialogueGuard<'_> {
    /// Run the opening exchange, mapping every non-proceed outcome to an error.
    pub(crate) async fn open(
        &mut self,
        intent: &str,
        ack: &str,
        subject: &str,
    ) -> Result<String, DispatchError> {
        match handshake::exchange(&mut **self, intent, ack, subject).await? {
            HandshakeOutcome::Proceed(payload) => Ok(payload),
            HandshakeOutcome::Rejected => Err(DispatchError::Rejected),
            HandshakeOutcome::Unavailable => Err(DispatchError::Unavailable),
        }
    }
}

/// Serialises dialogues with the client over a single line channel.
pub struct ProtocolEngine {
    session: Mutex<Box<dyn Dialogue>>,
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl ProtocolEngine {
    pub fn new(channel: impl Dialogue + 'static) -> Self {
        Self {
            session: Mutex::new(Box::new(channel)),
        }
    }

    /// Claim the channel, or fail immediately if a dialogue is in progress.
    pub fn try_begin(&self) -> Result<DialogueGuard<'_>, DispatchError> {
        self.session
            .try_lock()
            .map(DialogueGuard)
            .map_err(|_| DispatchError::Busy)
    }

    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    /// Forward a method call and report how the client answered.
    ///
    /// `args` is the call's argument tuple; it is only read if the client
    /// asks for it with `ARGS:<tags>`.
    pub async fn call_method(
        &self,
        iface: &InterfaceSpec,
        method: &str,
        args: &StructuredValue,
    ) -> Result<(), DispatchError> {
        let mut guard = self.try_begin()?;
        let intent = Operation::Method.intent(iface);
        let mut reply = guard
            .open(&intent, Operation::Method.ack(), method)
            .await?;

        let (head, tags) = reply
            .split_once(':')
            .map(|(h, t)| (h.to_string(), Some(t.to_string())))
            .unwrap_or_else(|| (reply.clone(), None));

        if head.eq_ignore_ascii_case("ARGS") {
            let tags = tags.unwrap_or_default();
            debug!(method, tags = %tags, "Client requested call arguments");
            encode_arguments(&mut *guard, &tags, args)
                .await
                .map_err(|e| DispatchError::codec(Direction::Write, e))?;
            reply = guard.next_line().await.map_err(DispatchError::reading)?;
        }

        classify_return(&reply)
    }

    /// Ask the client for a property value.
    pub async fn get_property(
        &self,
        iface: &InterfaceSpec,
        property: &str,
    ) -> Result<StructuredValue, DispatchError> {
        let mut guard = self.try_begin()?;
        let intent = Operation::GetProperty.intent(iface);
        let payload = guard
            .open(&intent, Operation::GetProperty.ack(), property)
            .await?;

        let (signature, first) = split_typed_line(&payload)
            .map_err(|e| DispatchError::codec(Direction::Read, e))?;
        // Decode before checking the type so the dialogue is read to its end.
        let value = decode_value(&mut *guard, &signature, first)
            .await
            .map_err(|e| DispatchError::codec(Direction::Read, e))?;

        if let Some(spec) = iface.property(property) {
            let got = signature.to_string();
            if got != spec.signature {
                warn!(
                    property,
                    expected = spec.signature,
                    got = %got,
                    "Client sent a property of the wrong type"
                );
                return Err(DispatchError::WrongType {
                    property: property.to_string(),
                    expected: spec.signature.to_string(),
                    got,
                });
            }
        }
        Ok(value)
    }

    /// Hand a new property value to the client.
    pub async fn set_property(
        &self,
        iface: &InterfaceSpec,
        property: &str,
        value: &StructuredValue,
    ) -> Result<(), DispatchError> {
        let mut guard = self.try_begin()?;
        let intent = Operation::SetProperty.intent(iface);
        let payload = guard
            .open(&intent, Operation::SetProperty.ack(), property)
            .await?;

        let Some((tags, confirmation)) = payload.split_once(':') else {
            return Err(DispatchError::MissingSeparator(payload));
        };
        if confirmation != "ok" {
            warn!(property, reply = %payload, "Client did not confirm property write");
            return Err(DispatchError::SetNotAcknowledged(payload));
        }

        encode_arguments(&mut *guard, tags, value)
            .await
            .map_err(|e| DispatchError::codec(Direction::Write, e))
    }
}

/// Classify the final line of a method dialogue.
fn classify_return(line: &str) -> Result<(), DispatchError> {
    if let Some(rest) = line.strip_prefix("IO ERROR: ") {
        return Err(DispatchError::ClientIo(rest.to_string()));
    }
    if let Some(rest) = line.strip_prefix("ERROR: ") {
        return Err(DispatchError::ClientError(rest.to_string()));
    }
    let head = line.split_once(':').map_or(line, |(h, _)| h);
    if head.eq_ignore_ascii_case("UNSUPPORTED") {
        return Err(DispatchError::Rejected);
    }
    if head.eq_ignore_ascii_case("VOID") {
        return Ok(());
    }
    warn!(reply = %line, "Unrecognised method return");
    Err(DispatchError::UnknownReturn(line.to_string()))
}
