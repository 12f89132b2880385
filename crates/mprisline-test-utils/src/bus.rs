//! A [`BusBackend`] that records what the daemon asked of it.

use std::sync::{Arc, Mutex};

use mprisline_core::bus::{BusBackend, BusError};
use mprisline_core::engine::ProtocolEngine;
use mprisline_core::relay::OutboundSignal;
use mprisline_core::BoxFuture;

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Started,
    Stopped,
    Emitted(OutboundSignal),
}

/// Shared view of a [`RecordingBus`]'s history, usable after the bus has
/// been moved into a daemon.
#[derive(Debug, Clone, Default)]
pub struct BusLog {
    events: Arc<Mutex<Vec<BusEvent>>>,
    engine: Arc<Mutex<Option<Arc<ProtocolEngine>>>>,
}

impl BusLog {
    pub fn events(&self) -> Vec<BusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn emitted(&self) -> Vec<OutboundSignal> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BusEvent::Emitted(signal) => Some(signal),
                _ => None,
            })
            .collect()
    }

    /// The engine handed to the most recent `start`, while running.
    pub fn engine(&self) -> Option<Arc<ProtocolEngine>> {
        self.engine.lock().unwrap().clone()
    }

    fn push(&self, event: BusEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Debug, Default)]
pub struct RecordingBus {
    log: BusLog,
    running: bool,
    fail_start: bool,
}

impl RecordingBus {
    pub fn new() -> (Self, BusLog) {
        let bus = Self::default();
        let log = bus.log.clone();
        (bus, log)
    }

    /// Make every `start` fail as if the bus name were taken.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

impl BusBackend for RecordingBus {
    fn start(&mut self, engine: Arc<ProtocolEngine>) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            if self.fail_start {
                return Err(BusError::NameUnavailable {
                    name: "org.mpris.MediaPlayer2.test".to_string(),
                    reason: "refused by test".to_string(),
                });
            }
            *self.log.engine.lock().unwrap() = Some(engine);
            self.running = true;
            self.log.push(BusEvent::Started);
            Ok(())
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            *self.log.engine.lock().unwrap() = None;
            self.running = false;
            self.log.push(BusEvent::Stopped);
            Ok(())
        })
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn emit<'a>(&'a self, signal: &'a OutboundSignal) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            if !self.running {
                return Err(BusError::NotRunning);
            }
            self.log.push(BusEvent::Emitted(signal.clone()));
            Ok(())
        })
    }
}
