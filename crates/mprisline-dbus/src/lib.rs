#![deny(unsafe_code)]

//! MPRIS service on the D-Bus session bus.
//!
//! [`MprisBus`] implements the core [`BusBackend`] seam with zbus. Each
//! incoming call is answered by a dialogue on the shared
//! [`ProtocolEngine`]; relayed client signals are put on the bus through
//! [`BusBackend::emit`].
//!
//! [`BusBackend`]: mprisline_core::bus::BusBackend
//! [`BusBackend::emit`]: mprisline_core::bus::BusBackend::emit
//! [`ProtocolEngine`]: mprisline_core::engine::ProtocolEngine

/// Bus values to and from [`StructuredValue`](mprisline_core::codec::StructuredValue).
pub mod convert;
/// Call routing and reply building.
pub mod dispatch;
/// Connection and name lifecycle.
pub mod service;

pub use convert::ConvertError;
pub use dispatch::{CallError, Reply};
pub use service::{MprisBus, ServiceError};
