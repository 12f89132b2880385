//! Daemon reactor: control commands, signal polling, and shutdown.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind as UnixSignal};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use mprisline_config::AppConfig;

use crate::build_info;
use crate::bus::BusBackend;
use crate::channel::{ChannelError, LineReader, LineWriter};
use crate::engine::ProtocolEngine;
use crate::relay::{FetchOutcome, PendingSignals, RelayError};

/// Every control line starts with this, in any letter case.
pub const CONTROL_PREFIX: &str = "mpris:";

/// Written to the control reply channel when `on`/`off` arrives mid-dialogue.
pub const BLOCKED_REPLY: &str = "FAIL:blocked";

/// A command from the client's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Register on the bus.
    On,
    /// Leave the bus.
    Off,
    /// The client has signals queued.
    Signal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlParseError {
    #[error("expected prefix \"mpris:\", got {0:?}")]
    MissingPrefix(String),

    #[error("unknown control command {0:?}")]
    Unknown(String),
}

impl FromStr for ControlCommand {
    type Err = ControlParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let rest = line
            .get(..CONTROL_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(CONTROL_PREFIX))
            .map(|_| &line[CONTROL_PREFIX.len()..])
            .ok_or_else(|| ControlParseError::MissingPrefix(line.to_string()))?;

        if rest.eq_ignore_ascii_case("on") {
            Ok(ControlCommand::On)
        } else if rest.eq_ignore_ascii_case("off") {
            Ok(ControlCommand::Off)
        } else if rest.eq_ignore_ascii_case("signal") {
            Ok(ControlCommand::Signal)
        } else {
            Err(ControlParseError::Unknown(rest.to_string()))
        }
    }
}

/// The mprisline daemon.
///
/// Owns the bus backend and the queued-signal counter; shares the
/// [`ProtocolEngine`] with the bus request handlers.
pub struct Daemon<B> {
    config: AppConfig,
    engine: Arc<ProtocolEngine>,
    bus: B,
    pending: PendingSignals,
    shutdown_tx: watch::Sender<bool>,
}

impl<B: BusBackend> Daemon<B> {
    pub fn new(config: AppConfig, engine: Arc<ProtocolEngine>, bus: B) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            engine,
            bus,
            pending: PendingSignals::default(),
            shutdown_tx,
        }
    }

    /// Use an existing shutdown channel, typically one whose receivers were
    /// already handed to the line readers.
    pub fn with_shutdown(mut self, shutdown_tx: watch::Sender<bool>) -> Self {
        self.shutdown_tx = shutdown_tx;
        self
    }

    /// Hand this to line readers so a shutdown aborts their reads.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Request a graceful shutdown. In-progress line reads are aborted.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn pending(&self) -> PendingSignals {
        self.pending
    }

    /// Run until the control channel closes or a shutdown is requested.
    ///
    /// `reply` receives `FAIL:blocked` notices; without it they are only
    /// logged.
    pub async fn run(
        &mut self,
        control: LineReader,
        mut reply: Option<LineWriter>,
    ) -> Result<(), DaemonError> {
        info!(
            version = %build_info::version_string(),
            app_name = %self.config.daemon.app_name,
            "mprisline daemon starting"
        );

        if self.config.daemon.start_service {
            self.start_service().await;
        }

        let (command_tx, mut command_rx) = mpsc::channel(64);
        let reader = tokio::spawn(read_control(control, command_tx));

        let mut ticker = tokio::time::interval(Duration::from_millis(
            self.config.daemon.signal_poll_interval_ms,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let signals = watch_os_signals(self.shutdown_tx.clone())?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let result = loop {
            tokio::select! {
                event = command_rx.recv() => match event {
                    Some(Ok(line)) => self.handle_line(&line, reply.as_mut()).await,
                    Some(Err(ChannelError::Closed)) | None => {
                        info!("Control channel closed, shutting down");
                        break Ok(());
                    }
                    Some(Err(ChannelError::Aborted)) => break Ok(()),
                    Some(Err(e)) => {
                        error!(error = %e, "Control channel failed");
                        break Err(DaemonError::Control(e));
                    }
                },
                _ = ticker.tick() => {
                    // A client that stops answering must not hold off shutdown.
                    let polled = tokio::select! {
                        result = self.poll_signals() => Some(result),
                        _ = shutdown_rx.wait_for(|stop| *stop) => None,
                    };
                    match polled {
                        Some(Ok(())) => {}
                        Some(Err(e)) => break Err(e),
                        None => {
                            info!("Shutdown requested during signal poll, stopping daemon");
                            break Ok(());
                        }
                    }
                }
                _ = async { shutdown_rx.wait_for(|stop| *stop).await.map(|_| ()) } => {
                    info!("Shutdown requested, stopping daemon");
                    break Ok(());
                }
            }
        };

        self.shutdown_tx.send_replace(true);
        signals.abort();
        reader.abort();
        self.stop_service().await;
        info!("Daemon stopped");
        result
    }

    async fn handle_line(&mut self, line: &str, reply: Option<&mut LineWriter>) {
        debug!(line, "Control line received");
        match line.parse() {
            Ok(command) => self.handle_command(command, reply).await,
            Err(e) => warn!(error = %e, "Ignoring control line"),
        }
    }

    /// Apply one control command.
    pub async fn handle_command(&mut self, command: ControlCommand, reply: Option<&mut LineWriter>) {
        match command {
            ControlCommand::Signal => {
                self.pending.notify();
                debug!(pending = self.pending.count(), "Client has signals queued");
            }
            ControlCommand::On | ControlCommand::Off if self.engine.is_busy() => {
                warn!(?command, "Dialogue in progress, refusing service switch");
                if let Some(writer) = reply {
                    if let Err(e) = writer.write_line(BLOCKED_REPLY).await {
                        warn!(error = %e, "Could not deliver blocked notice");
                    }
                }
            }
            ControlCommand::On => self.start_service().await,
            ControlCommand::Off => self.stop_service().await,
        }
    }

    async fn start_service(&mut self) {
        if self.bus.is_running() {
            debug!("Service already running");
            return;
        }
        match self.bus.start(self.engine.clone()).await {
            Ok(()) => info!("MPRIS service started"),
            Err(e) => warn!(error = %e, "Could not start MPRIS service"),
        }
    }

    async fn stop_service(&mut self) {
        if !self.bus.is_running() {
            return;
        }
        match self.bus.stop().await {
            Ok(()) => info!("MPRIS service stopped"),
            Err(e) => warn!(error = %e, "Could not stop MPRIS service cleanly"),
        }
    }

    /// One timer tick: relay queued signals until the client runs dry.
    ///
    /// Only a broken dialogue channel is an error; every other failure is
    /// logged and polling waits for the next `mpris:signal` notice.
    pub async fn poll_signals(&mut self) -> Result<(), DaemonError> {
        if !self.pending.should_poll() || !self.bus.is_running() {
            return Ok(());
        }

        let mut relayed = 0usize;
        while self.pending.should_poll() {
            match self.engine.fetch_signal().await {
                Ok(FetchOutcome::Signal(descriptor)) => {
                    let signal = descriptor.into_outbound();
                    match self.bus.emit(&signal).await {
                        Ok(()) => relayed += 1,
                        Err(e) => warn!(
                            member = %signal.member,
                            path = %signal.path,
                            error = %e,
                            "Could not emit signal"
                        ),
                    }
                }
                Ok(FetchOutcome::Exhausted) => self.pending.clear(),
                Err(e) if e.is_busy() => {
                    debug!("Dialogue in progress, deferring signal poll");
                    break;
                }
                Err(e) if e.is_channel_failure() => {
                    error!(error = %e, "Dialogue channel failed while fetching signals");
                    return Err(DaemonError::Dialogue(e));
                }
                Err(e) => {
                    warn!(error = %e, "Signal fetch failed, waiting for the next notice");
                    self.pending.stall();
                }
            }
        }

        if relayed > 0 {
            debug!(relayed, "Relayed client signals");
        }
        Ok(())
    }
}

/// Turn Ctrl-C and SIGTERM into a shutdown request.
fn watch_os_signals(shutdown_tx: watch::Sender<bool>) -> std::io::Result<JoinHandle<()>> {
    let mut sigterm = signal(UnixSignal::terminate())?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Ctrl-C received, initiating graceful shutdown"),
            _ = sigterm.recv() => warn!("SIGTERM received, initiating graceful shutdown"),
        }
        shutdown_tx.send_replace(true);
    }))
}

/// Forward control lines to the reactor until the channel ends.
async fn read_control(
    mut reader: LineReader,
    tx: mpsc::Sender<Result<String, ChannelError>>,
) {
    loop {
        let item = reader.read_line().await.map(|line| line.text.into_owned());
        let finished = item.is_err();
        if tx.send(item).await.is_err() || finished {
            break;
        }
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("control channel failed: {0}")]
    Control(#[source] ChannelError),

    #[error("dialogue channel failed: {0}")]
    Dialogue(#[source] RelayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
