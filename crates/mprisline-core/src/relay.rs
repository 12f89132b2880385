//! Signal relay: pulls queued signals from the client and shapes them for
//! the bus.
//!
//! The client announces queued signals on the control channel with
//! `mpris:signal`. The daemon then polls with a `send:signal` dialogue until
//! the client answers `ACK:NA`. Each successful dialogue yields five lines:
//!
//! ```text
//! /org/mpris/MediaPlayer2          object path (handshake payload)
//! org.mpris.MediaPlayer2.Player    interface
//! PlaybackStatus                   member
//! property                         kind: "property" or "signal"
//! s:Playing                        <type>:<value>, more lines if composite
//! ```

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::codec::{decode_value, split_typed_line, BasicType, Signature, StructuredValue};
use crate::engine::{Direction, DispatchError, ProtocolEngine};
use crate::interfaces::PROPERTIES_INTERFACE;

pub const SIGNAL_INTENT: &str = "send:signal";
pub const SIGNAL_ACK: &str = "signal";
pub const SIGNAL_SUBJECT: &str = "signaldata";

const PROPERTIES_CHANGED: &str = "PropertiesChanged";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// A property changed; relayed as `PropertiesChanged`.
    Property,
    /// An interface signal such as `Seeked`.
    Signal,
}

impl FromStr for SignalKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "property" => Ok(SignalKind::Property),
            "signal" => Ok(SignalKind::Signal),
            other => Err(RelayError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalKind::Property => "property",
            SignalKind::Signal => "signal",
        })
    }
}

/// A signal as the client described it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDescriptor {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub kind: SignalKind,
    pub value: StructuredValue,
}

/// A signal ready to put on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSignal {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub body: Vec<StructuredValue>,
}

impl SignalDescriptor {
    pub fn into_outbound(self) -> OutboundSignal {
        match self.kind {
            SignalKind::Property => {
                let changed = StructuredValue::Array {
                    element: Signature::DictEntry(BasicType::String, Box::new(Signature::Variant)),
                    items: vec![StructuredValue::dict_entry(
                        StructuredValue::str(self.member),
                        StructuredValue::variant(self.value),
                    )],
                };
                let invalidated = StructuredValue::Array {
                    element: Signature::Basic(BasicType::String),
                    items: Vec::new(),
                };
                OutboundSignal {
                    path: self.path,
                    interface: PROPERTIES_INTERFACE.to_string(),
                    member: PROPERTIES_CHANGED.to_string(),
                    body: vec![StructuredValue::str(self.interface), changed, invalidated],
                }
            }
            SignalKind::Signal => {
                let body = match self.value {
                    StructuredValue::Tuple(fields) => fields,
                    single => vec![single],
                };
                OutboundSignal {
                    path: self.path,
                    interface: self.interface,
                    member: self.member,
                    body,
                }
            }
        }
    }
}

/// Result of one `send:signal` dialogue.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Signal(SignalDescriptor),
    /// The client answered `ACK:NA`: nothing left to send.
    Exhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("unknown signal kind {0:?}")]
    UnknownKind(String),
}

impl RelayError {
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, RelayError::Dispatch(e) if e.is_channel_failure())
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, RelayError::Dispatch(DispatchError::Busy))
    }
}

impl ProtocolEngine {
    /// Run one `send:signal` dialogue.
    pub async fn fetch_signal(&self) -> Result<FetchOutcome, RelayError> {
        let mut guard = self.try_begin()?;
        let path = match guard.open(SIGNAL_INTENT, SIGNAL_ACK, SIGNAL_SUBJECT).await {
            Ok(path) => path,
            Err(DispatchError::Unavailable) => return Ok(FetchOutcome::Exhausted),
            Err(e) => return Err(e.into()),
        };

        let interface = guard.next_line().await.map_err(DispatchError::reading)?;
        let member = guard.next_line().await.map_err(DispatchError::reading)?;
        let kind = guard.next_line().await.map_err(DispatchError::reading)?;
        let typed = guard.next_line().await.map_err(DispatchError::reading)?;
        debug!(path = %path, interface = %interface, member = %member, kind = %kind, "Signal data received");

        let kind: SignalKind = kind.parse()?;
        let (signature, first) =
            split_typed_line(&typed).map_err(|e| DispatchError::codec(Direction::Read, e))?;
        let value = decode_value(&mut *guard, &signature, first)
            .await
            .map_err(|e| DispatchError::codec(Direction::Read, e))?;

        Ok(FetchOutcome::Signal(SignalDescriptor {
            path,
            interface,
            member,
            kind,
            value,
        }))
    }
}

/// Queued-signal bookkeeping for the polling timer.
///
/// A failed fetch stalls polling until the client announces another signal,
/// so a misbehaving client is not hammered every tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingSignals {
    count: u32,
    stalled: bool,
}

impl PendingSignals {
    /// Record an `mpris:signal` notice.
    pub fn notify(&mut self) {
        self.count = self.count.saturating_add(1);
        self.stalled = false;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Whether the next timer tick should poll the client.
    pub fn should_poll(&self) -> bool {
        self.count > 0 && !self.stalled
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn stall(&mut self) {
        self.stalled = true;
    }
}
