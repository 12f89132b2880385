//! Session bus service: owns the connection, the bus name, and the task that
//! serves incoming calls.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::export::futures_util::StreamExt;
use zbus::message::{Flags, Type};
use zbus::zvariant::StructureBuilder;
use zbus::{Connection, Message, MessageStream};

use mprisline_config::AppConfig;
use mprisline_core::bus::{BusBackend, BusError};
use mprisline_core::engine::ProtocolEngine;
use mprisline_core::interfaces::BUS_NAME_PREFIX;
use mprisline_core::relay::OutboundSignal;
use mprisline_core::BoxFuture;

use crate::convert::{to_value, ConvertError};
use crate::dispatch;

/// Errors from the zbus side of the service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("session bus unavailable: {0}")]
    Connect(#[source] zbus::Error),

    #[error("could not own {name}: {source}")]
    Name {
        name: String,
        #[source]
        source: zbus::Error,
    },

    #[error("signal body for {member} cannot be sent: {source}")]
    Body {
        member: String,
        #[source]
        source: ConvertError,
    },

    #[error("signal {member} could not be built or sent: {source}")]
    Send {
        member: String,
        #[source]
        source: zbus::Error,
    },
}

impl From<ServiceError> for BusError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Connect(e) => BusError::Connection(e.to_string()),
            ServiceError::Name { name, source } => BusError::NameUnavailable {
                name,
                reason: source.to_string(),
            },
            ServiceError::Body { member, source } => BusError::Emit {
                member,
                reason: source.to_string(),
            },
            ServiceError::Send { member, source } => BusError::Emit {
                member,
                reason: source.to_string(),
            },
        }
    }
}

/// `org.mpris.MediaPlayer2.<app_name>`
pub fn primary_name(app_name: &str) -> String {
    format!("{BUS_NAME_PREFIX}.{app_name}")
}

/// Name used when the primary one is owned by someone else.
pub fn fallback_name(app_name: &str, parent_id: u32) -> String {
    format!("{}.instance{parent_id}", primary_name(app_name))
}

struct Running {
    connection: Connection,
    name: String,
    task: JoinHandle<()>,
}

/// [`BusBackend`] on the user's session bus.
pub struct MprisBus {
    app_name: String,
    running: Option<Running>,
}

impl MprisBus {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            running: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.daemon.app_name.clone())
    }

    /// The name currently owned, if the service is running.
    pub fn bus_name(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.name.as_str())
    }

    async fn connect(&mut self, engine: Arc<ProtocolEngine>) -> Result<(), ServiceError> {
        let connection = Connection::session().await.map_err(ServiceError::Connect)?;
        // Subscribe before the name is visible so no early call is missed.
        let stream = MessageStream::from(&connection);
        let name = claim_name(&connection, &self.app_name).await?;
        let task = tokio::spawn(serve(connection.clone(), stream, engine));

        info!(bus_name = %name, "MPRIS service registered");
        self.running = Some(Running {
            connection,
            name,
            task,
        });
        Ok(())
    }
}

async fn claim_name(connection: &Connection, app_name: &str) -> Result<String, ServiceError> {
    let primary = primary_name(app_name);
    match connection.request_name(primary.as_str()).await {
        Ok(()) => Ok(primary),
        Err(zbus::Error::NameTaken) => {
            let fallback = fallback_name(app_name, std::os::unix::process::parent_id());
            warn!(taken = %primary, bus_name = %fallback, "Bus name taken, using instance name");
            match connection.request_name(fallback.as_str()).await {
                Ok(()) => Ok(fallback),
                Err(source) => Err(ServiceError::Name {
                    name: fallback,
                    source,
                }),
            }
        }
        Err(source) => Err(ServiceError::Name {
            name: primary,
            source,
        }),
    }
}

async fn serve(connection: Connection, mut stream: MessageStream, engine: Arc<ProtocolEngine>) {
    while let Some(next) = stream.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Unreadable bus message");
                continue;
            }
        };
        if msg.message_type() != Type::MethodCall {
            continue;
        }
        tokio::spawn(respond(connection.clone(), msg, engine.clone()));
    }
    debug!("Bus message stream ended");
}

async fn respond(connection: Connection, call: Message, engine: Arc<ProtocolEngine>) {
    let result = dispatch::handle_call(&engine, &call).await;
    if let Err(e) = &result {
        debug!(error = %e, "Bus call failed");
    }
    if call
        .primary_header()
        .flags()
        .contains(Flags::NoReplyExpected)
    {
        return;
    }

    let reply = match dispatch::reply_message(&call, result) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Could not build reply");
            return;
        }
    };
    if let Err(e) = connection.send(&reply).await {
        warn!(error = %e, "Could not send reply");
    }
}

/// Build the bus message for a relayed signal.
pub fn signal_message(signal: &OutboundSignal) -> Result<Message, ServiceError> {
    let body_error = |source| ServiceError::Body {
        member: signal.member.clone(),
        source,
    };
    let send_error = |source| ServiceError::Send {
        member: signal.member.clone(),
        source,
    };

    let builder = Message::signal(
        signal.path.as_str(),
        signal.interface.as_str(),
        signal.member.as_str(),
    )
    .map_err(send_error)?;

    if signal.body.is_empty() {
        return builder.build(&()).map_err(send_error);
    }
    let mut fields = StructureBuilder::new();
    for value in &signal.body {
        fields = fields.append_field(to_value(value).map_err(body_error)?);
    }
    builder.build(&fields.build()).map_err(send_error)
}

impl BusBackend for MprisBus {
    fn start(&mut self, engine: Arc<ProtocolEngine>) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            if self.running.is_some() {
                return Ok(());
            }
            self.connect(engine).await.map_err(BusError::from)
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            let Some(running) = self.running.take() else {
                return Ok(());
            };
            running.task.abort();
            if let Err(e) = running.connection.release_name(running.name.as_str()).await {
                warn!(bus_name = %running.name, error = %e, "Could not release bus name");
            }
            info!(bus_name = %running.name, "MPRIS service unregistered");
            Ok(())
        })
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn emit<'a>(&'a self, signal: &'a OutboundSignal) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            let Some(running) = &self.running else {
                return Err(BusError::NotRunning);
            };
            let message = signal_message(signal)?;
            running
                .connection
                .send(&message)
                .await
                .map_err(|source| ServiceError::Send {
                    member: signal.member.clone(),
                    source,
                })?;
            debug!(interface = %signal.interface, member = %signal.member, "Signal emitted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mprisline_core::codec::StructuredValue;
    use mprisline_core::interfaces::{OBJECT_PATH, PROPERTIES_INTERFACE};
    use mprisline_test_utils::{init_test_tracing, TestConfigBuilder};
    use pretty_assertions::assert_eq;

    fn body_signature(msg: &Message) -> String {
        msg.header()
            .signature()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_bus_names() {
        assert_eq!(primary_name("vlc"), "org.mpris.MediaPlayer2.vlc");
        assert_eq!(
            fallback_name("vlc", 4242),
            "org.mpris.MediaPlayer2.vlc.instance4242"
        );
    }

    #[test]
    fn test_new_service_is_stopped() {
        init_test_tracing();
        let config = TestConfigBuilder::new().app_name("jukebox").build();
        let bus = MprisBus::from_config(&config);
        assert_eq!(bus.app_name, "jukebox");
        assert!(!bus.is_running());
        assert_eq!(bus.bus_name(), None);
    }

    #[tokio::test]
    async fn test_emit_requires_running_service() {
        let bus = MprisBus::new("mprisline");
        let signal = OutboundSignal {
            path: OBJECT_PATH.to_string(),
            interface: "org.mpris.MediaPlayer2.Player".to_string(),
            member: "Seeked".to_string(),
            body: vec![StructuredValue::Int64(0)],
        };
        assert!(matches!(bus.emit(&signal).await, Err(BusError::NotRunning)));
    }

    #[test]
    fn test_properties_changed_message() {
        let signal = mprisline_core::relay::SignalDescriptor {
            path: OBJECT_PATH.to_string(),
            interface: "org.mpris.MediaPlayer2.Player".to_string(),
            member: "PlaybackStatus".to_string(),
            kind: mprisline_core::relay::SignalKind::Property,
            value: StructuredValue::str("Playing"),
        }
        .into_outbound();

        let msg = signal_message(&signal).unwrap();
        assert_eq!(msg.message_type(), Type::Signal);
        let header = msg.header();
        assert_eq!(
            header.interface().map(|i| i.as_str()),
            Some(PROPERTIES_INTERFACE)
        );
        assert_eq!(
            header.member().map(|m| m.as_str()),
            Some("PropertiesChanged")
        );
        assert_eq!(body_signature(&msg), "sa{sv}as");
    }

    #[test]
    fn test_seeked_message() {
        let signal = OutboundSignal {
            path: OBJECT_PATH.to_string(),
            interface: "org.mpris.MediaPlayer2.Player".to_string(),
            member: "Seeked".to_string(),
            body: vec![StructuredValue::Int64(1_000)],
        };
        let msg = signal_message(&signal).unwrap();
        assert_eq!(body_signature(&msg), "x");
    }

    #[test]
    fn test_signal_without_arguments() {
        let signal = OutboundSignal {
            path: OBJECT_PATH.to_string(),
            interface: "org.mpris.MediaPlayer2".to_string(),
            member: "Poke".to_string(),
            body: Vec::new(),
        };
        let msg = signal_message(&signal).unwrap();
        assert_eq!(body_signature(&msg), "");
    }

    #[test]
    fn test_unsendable_body_is_reported() {
        let signal = OutboundSignal {
            path: OBJECT_PATH.to_string(),
            interface: "org.mpris.MediaPlayer2".to_string(),
            member: "Handles".to_string(),
            body: vec![StructuredValue::Handle(0)],
        };
        assert!(matches!(
            signal_message(&signal),
            Err(ServiceError::Body { .. })
        ));
    }
}
