//! Routing of incoming bus calls onto engine dialogues.
//!
//! [`handle_call`] does the type and name checks the bus expects, runs at
//! most one dialogue through the [`ProtocolEngine`], and leaves building the
//! reply message to [`reply_message`].

use std::collections::HashMap;

use tracing::{debug, warn};
use zbus::zvariant::{Structure, Value};
use zbus::Message;

use mprisline_core::codec::StructuredValue;
use mprisline_core::engine::{DispatchError, Operation, ProtocolEngine};
use mprisline_core::interfaces::{
    self, InterfaceSpec, PropertySpec, INTROSPECTABLE_INTERFACE, MPRIS_INTERFACES, OBJECT_PATH,
    PEER_INTERFACE, PROPERTIES_INTERFACE,
};

use crate::convert::{from_value, to_value};

pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";

/// A successful answer to a bus call.
#[derive(Debug, PartialEq)]
pub enum Reply {
    Empty,
    Text(String),
    /// Sent as a variant, as `Properties.Get` requires.
    Value(Value<'static>),
    Properties(HashMap<String, Value<'static>>),
}

/// A named bus error and its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct CallError {
    pub name: &'static str,
    pub message: String,
}

impl CallError {
    pub fn new(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
        }
    }

    fn dispatch(operation: Operation, err: DispatchError) -> Self {
        Self::new(err.bus_error_name(operation), err.to_string())
    }

    fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(INVALID_ARGS, message)
    }
}

/// Answer one method call addressed to the player.
pub async fn handle_call(engine: &ProtocolEngine, call: &Message) -> Result<Reply, CallError> {
    let header = call.header();
    let member = header.member().map(|m| m.as_str()).unwrap_or_default();
    let interface = header.interface().map(|i| i.as_str());
    let path = header.path().map(|p| p.as_str()).unwrap_or_default();
    let signature = header.signature().map(|s| s.as_str()).unwrap_or_default();
    debug!(path, interface, member, signature, "Bus call");

    if interface == Some(PEER_INTERFACE) {
        return match member {
            "Ping" => Ok(Reply::Empty),
            other => Err(unknown_method(PEER_INTERFACE, other)),
        };
    }
    if path != OBJECT_PATH {
        return Err(CallError::new(
            UNKNOWN_OBJECT,
            format!("no object at {path}"),
        ));
    }

    match interface {
        Some(INTROSPECTABLE_INTERFACE) => match member {
            "Introspect" => Ok(Reply::Text(interfaces::introspection_xml())),
            other => Err(unknown_method(INTROSPECTABLE_INTERFACE, other)),
        },
        Some(PROPERTIES_INTERFACE) => properties(engine, call, member, signature).await,
        Some(name) => {
            let iface = interfaces::interface(name).ok_or_else(|| unknown_interface(name))?;
            call_method(engine, call, iface, member, signature).await
        }
        // Calls without an interface go to the first one with that member.
        None => {
            let iface = MPRIS_INTERFACES
                .iter()
                .copied()
                .find(|iface| iface.method(member).is_some())
                .ok_or_else(|| {
                    CallError::new(UNKNOWN_METHOD, format!("no method {member} on {path}"))
                })?;
            call_method(engine, call, iface, member, signature).await
        }
    }
}

async fn call_method(
    engine: &ProtocolEngine,
    call: &Message,
    iface: &'static InterfaceSpec,
    member: &str,
    signature: &str,
) -> Result<Reply, CallError> {
    let method = iface
        .method(member)
        .ok_or_else(|| unknown_method(iface.name, member))?;
    let expected = method.input_signature();
    if signature != expected {
        return Err(CallError::invalid_args(format!(
            "{member} takes ({expected}), got ({signature})"
        )));
    }

    let args = if expected.is_empty() {
        StructuredValue::Tuple(Vec::new())
    } else {
        let body = call.body();
        let fields: Structure<'_> = body
            .deserialize()
            .map_err(|e| CallError::invalid_args(e.to_string()))?;
        let fields = fields
            .fields()
            .iter()
            .map(from_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CallError::invalid_args(e.to_string()))?;
        StructuredValue::Tuple(fields)
    };

    engine
        .call_method(iface, member, &args)
        .await
        .map_err(|e| CallError::dispatch(Operation::Method, e))?;
    Ok(Reply::Empty)
}

async fn properties(
    engine: &ProtocolEngine,
    call: &Message,
    member: &str,
    signature: &str,
) -> Result<Reply, CallError> {
    let body = call.body();
    match member {
        "Get" => {
            expect_signature(member, signature, "ss")?;
            let (iface_name, property): (String, String) = body
                .deserialize()
                .map_err(|e| CallError::invalid_args(e.to_string()))?;
            let (iface, _) = lookup_property(&iface_name, &property)?;
            let value = engine
                .get_property(iface, &property)
                .await
                .map_err(|e| CallError::dispatch(Operation::GetProperty, e))?;
            let value = to_value(&value).map_err(|e| CallError::new(FAILED, e.to_string()))?;
            Ok(Reply::Value(value))
        }
        "GetAll" => {
            expect_signature(member, signature, "s")?;
            let iface_name: String = body
                .deserialize()
                .map_err(|e| CallError::invalid_args(e.to_string()))?;
            let iface =
                interfaces::interface(&iface_name).ok_or_else(|| unknown_interface(&iface_name))?;
            get_all(engine, iface).await.map(Reply::Properties)
        }
        "Set" => {
            expect_signature(member, signature, "ssv")?;
            let (iface_name, property, value): (String, String, Value<'_>) = body
                .deserialize()
                .map_err(|e| CallError::invalid_args(e.to_string()))?;
            let (iface, spec) = lookup_property(&iface_name, &property)?;
            if !spec.access.is_writable() {
                return Err(CallError::new(
                    PROPERTY_READ_ONLY,
                    format!("{property} is read-only"),
                ));
            }
            let actual = value.value_signature();
            if actual.as_str() != spec.signature {
                return Err(CallError::invalid_args(format!(
                    "{property} has type {}, got {}",
                    spec.signature,
                    actual.as_str()
                )));
            }
            let value = from_value(&value).map_err(|e| CallError::invalid_args(e.to_string()))?;
            engine
                .set_property(iface, &property, &value)
                .await
                .map_err(|e| CallError::dispatch(Operation::SetProperty, e))?;
            Ok(Reply::Empty)
        }
        other => Err(unknown_method(PROPERTIES_INTERFACE, other)),
    }
}

/// Fetch every property of `iface` in turn.
///
/// Properties the client cannot or will not report are left out. A busy
/// engine or a failed channel aborts the whole call.
async fn get_all(
    engine: &ProtocolEngine,
    iface: &'static InterfaceSpec,
) -> Result<HashMap<String, Value<'static>>, CallError> {
    let mut values = HashMap::with_capacity(iface.properties.len());
    for spec in iface.properties {
        match engine.get_property(iface, spec.name).await {
            Ok(value) => match to_value(&value) {
                Ok(value) => {
                    values.insert(spec.name.to_string(), value);
                }
                Err(e) => warn!(property = spec.name, error = %e, "Skipping property"),
            },
            Err(e @ DispatchError::Busy) => {
                return Err(CallError::dispatch(Operation::GetProperty, e));
            }
            Err(e) if e.is_channel_failure() => {
                return Err(CallError::dispatch(Operation::GetProperty, e));
            }
            Err(e) => debug!(property = spec.name, error = %e, "Skipping property"),
        }
    }
    Ok(values)
}

fn lookup_property(
    iface_name: &str,
    property: &str,
) -> Result<(&'static InterfaceSpec, &'static PropertySpec), CallError> {
    let iface = interfaces::interface(iface_name).ok_or_else(|| unknown_interface(iface_name))?;
    let spec = iface.property(property).ok_or_else(|| {
        CallError::new(
            UNKNOWN_PROPERTY,
            format!("{iface_name} has no property {property}"),
        )
    })?;
    Ok((iface, spec))
}

fn expect_signature(member: &str, actual: &str, expected: &str) -> Result<(), CallError> {
    if actual == expected {
        Ok(())
    } else {
        Err(CallError::invalid_args(format!(
            "{member} takes ({expected}), got ({actual})"
        )))
    }
}

fn unknown_interface(name: &str) -> CallError {
    CallError::new(UNKNOWN_INTERFACE, format!("no interface {name}"))
}

fn unknown_method(iface: &str, member: &str) -> CallError {
    CallError::new(UNKNOWN_METHOD, format!("{iface} has no method {member}"))
}

/// Build the reply or error message for `call`.
pub fn reply_message(call: &Message, result: Result<Reply, CallError>) -> zbus::Result<Message> {
    match result {
        Ok(Reply::Empty) => Message::method_reply(call)?.build(&()),
        Ok(Reply::Text(text)) => Message::method_reply(call)?.build(&text),
        Ok(Reply::Value(value)) => Message::method_reply(call)?.build(&value),
        Ok(Reply::Properties(values)) => Message::method_reply(call)?.build(&values),
        Err(err) => Message::method_error(call, err.name)?.build(&err.message),
    }
}
