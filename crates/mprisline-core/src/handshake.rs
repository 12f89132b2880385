//! The four-step exchange that opens every dialogue with the client.
//!
//! ```text
//!   daemon                         client
//!     │── intent  "player:method" ──►│
//!     │◄── ack    "method"        ───│   or UNSUPPORTED / ACK:NA
//!     │── subject "PlayPause"     ──►│
//!     │◄── payload "VOID"         ───│
//! ```

use tracing::{debug, warn};

use crate::channel::{ChannelError, LineSink, LineSource};

/// Acknowledgement meaning the client does not implement the operation.
pub const UNSUPPORTED: &str = "UNSUPPORTED";

/// Acknowledgement meaning the operation is known but has nothing to offer.
pub const NOT_AVAILABLE: &str = "ACK:NA";

/// How a completed exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The client acknowledged; carries the payload line that followed the
    /// subject.
    Proceed(String),
    /// The client answered `UNSUPPORTED`; the subject was never sent.
    Rejected,
    /// The client answered `ACK:NA`.
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("writing to the client failed: {0}")]
    Write(#[source] ChannelError),

    #[error("reading from the client failed: {0}")]
    Read(#[source] ChannelError),

    #[error("expected acknowledgement {expected:?}, got {got:?}")]
    Mismatch { expected: String, got: String },
}

/// Run intent → ack → subject → payload over `channel`.
pub async fn exchange<C>(
    channel: &mut C,
    intent: &str,
    ack: &str,
    subject: &str,
) -> Result<HandshakeOutcome, HandshakeError>
where
    C: LineSource + LineSink + ?Sized,
{
    channel
        .send_line(intent)
        .await
        .map_err(HandshakeError::Write)?;
    let reply = channel.next_line().await.map_err(HandshakeError::Read)?;

    if reply == UNSUPPORTED {
        debug!(intent, subject, "Client does not support operation");
        return Ok(HandshakeOutcome::Rejected);
    }
    if reply == NOT_AVAILABLE {
        return Ok(HandshakeOutcome::Unavailable);
    }
    if reply != ack {
        warn!(intent, expected = ack, got = %reply, "Handshake acknowledgement mismatch");
        return Err(HandshakeError::Mismatch {
            expected: ack.to_string(),
            got: reply,
        });
    }

    channel
        .send_line(subject)
        .await
        .map_err(HandshakeError::Write)?;
    let payload = channel.next_line().await.map_err(HandshakeError::Read)?;
    Ok(HandshakeOutcome::Proceed(payload))
}
