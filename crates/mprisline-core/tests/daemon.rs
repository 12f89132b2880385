//! Reactor behaviour against a recording bus backend.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::{oneshot, watch};

use mprisline_core::bus::BusBackend;
use mprisline_core::codec::StructuredValue;
use mprisline_core::daemon::{ControlCommand, Daemon, BLOCKED_REPLY};
use mprisline_core::engine::ProtocolEngine;
use mprisline_core::interfaces::{PLAYER, PROPERTIES_INTERFACE};
use mprisline_core::relay::{SIGNAL_ACK, SIGNAL_INTENT, SIGNAL_SUBJECT};
use mprisline_test_utils::{BusEvent, BusLog, RecordingBus, ScriptedClient, TestConfigBuilder};

struct Fixture {
    daemon: Daemon<RecordingBus>,
    engine: Arc<ProtocolEngine>,
    log: BusLog,
    client: ScriptedClient,
}

fn fixture(builder: TestConfigBuilder) -> Fixture {
    let (channel, client) = ScriptedClient::channel();
    let engine = Arc::new(ProtocolEngine::new(channel));
    let (bus, log) = RecordingBus::new();
    Fixture {
        daemon: Daemon::new(builder.build(), engine.clone(), bus),
        engine,
        log,
        client,
    }
}

async fn answer_signal(client: &mut ScriptedClient, lines: &[&str]) {
    client
        .handshake(SIGNAL_INTENT, SIGNAL_ACK, SIGNAL_SUBJECT, "/org/mpris/MediaPlayer2")
        .await;
    client.send_all(lines).await;
}

async fn answer_none_left(client: &mut ScriptedClient) {
    client.expect(SIGNAL_INTENT).await;
    client.send("ACK:NA").await;
}

/// Assert the daemon writes nothing to the client for a short while.
async fn assert_quiet(client: &mut ScriptedClient) {
    let read = tokio::time::timeout(Duration::from_millis(50), client.recv()).await;
    assert!(read.is_err(), "unexpected line: {read:?}");
}

#[test_log::test(tokio::test)]
async fn test_on_and_off_switch_the_service() {
    let Fixture {
        mut daemon, log, ..
    } = fixture(TestConfigBuilder::new());

    daemon.handle_command(ControlCommand::On, None).await;
    daemon.handle_command(ControlCommand::On, None).await;
    assert!(daemon.bus().is_running());
    assert!(log.engine().is_some());

    daemon.handle_command(ControlCommand::Off, None).await;
    daemon.handle_command(ControlCommand::Off, None).await;
    assert!(!daemon.bus().is_running());
    assert_eq!(log.events(), vec![BusEvent::Started, BusEvent::Stopped]);
}

#[test_log::test(tokio::test)]
async fn test_failed_start_is_not_fatal() {
    let (channel, _client) = ScriptedClient::channel();
    let (bus, log) = RecordingBus::new();
    let mut daemon = Daemon::new(
        TestConfigBuilder::new().build(),
        Arc::new(ProtocolEngine::new(channel)),
        bus.failing_start(),
    );
    daemon.handle_command(ControlCommand::On, None).await;
    assert!(!daemon.bus().is_running());
    assert!(log.events().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_signals_relayed_until_not_available() {
    let Fixture {
        mut daemon,
        log,
        mut client,
        ..
    } = fixture(TestConfigBuilder::new());
    daemon.handle_command(ControlCommand::On, None).await;
    daemon.handle_command(ControlCommand::Signal, None).await;

    let script = tokio::spawn(async move {
        answer_signal(
            &mut client,
            &["org.mpris.MediaPlayer2.Player", "PlaybackStatus", "property", "s:Playing"],
        )
        .await;
        answer_signal(
            &mut client,
            &["org.mpris.MediaPlayer2.Player", "Seeked", "signal", "x:1000"],
        )
        .await;
        answer_none_left(&mut client).await;
        client
    });

    daemon.poll_signals().await.unwrap();
    script.await.unwrap();

    assert_eq!(daemon.pending().count(), 0);
    let emitted = log.emitted();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].interface, PROPERTIES_INTERFACE);
    assert_eq!(emitted[0].member, "PropertiesChanged");
    assert_eq!(
        emitted[0].body[0],
        StructuredValue::str("org.mpris.MediaPlayer2.Player")
    );
    assert_eq!(emitted[1].interface, "org.mpris.MediaPlayer2.Player");
    assert_eq!(emitted[1].member, "Seeked");
    assert_eq!(emitted[1].body, vec![StructuredValue::Int64(1000)]);
}

#[test_log::test(tokio::test)]
async fn test_failed_fetch_stalls_until_next_notice() {
    let Fixture {
        mut daemon,
        log,
        mut client,
        ..
    } = fixture(TestConfigBuilder::new());
    daemon.handle_command(ControlCommand::On, None).await;
    daemon.handle_command(ControlCommand::Signal, None).await;

    let script = tokio::spawn(async move {
        client.expect(SIGNAL_INTENT).await;
        client.send("UNSUPPORTED").await;
        client
    });
    daemon.poll_signals().await.unwrap();
    let mut client = script.await.unwrap();
    assert!(daemon.pending().is_stalled());
    assert_eq!(daemon.pending().count(), 1);

    // Stalled: the next tick does not talk to the client.
    daemon.poll_signals().await.unwrap();
    assert_quiet(&mut client).await;

    daemon.handle_command(ControlCommand::Signal, None).await;
    let script = tokio::spawn(async move {
        answer_none_left(&mut client).await;
        client
    });
    daemon.poll_signals().await.unwrap();
    script.await.unwrap();
    assert_eq!(daemon.pending().count(), 0);
    assert!(log.emitted().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_no_polling_while_service_is_off() {
    let Fixture {
        mut daemon,
        mut client,
        ..
    } = fixture(TestConfigBuilder::new());
    daemon.handle_command(ControlCommand::Signal, None).await;
    daemon.poll_signals().await.unwrap();
    assert_quiet(&mut client).await;
    assert_eq!(daemon.pending().count(), 1);
}

#[test_log::test(tokio::test)]
async fn test_switch_refused_during_dialogue() {
    let Fixture {
        mut daemon,
        engine,
        log,
        mut client,
    } = fixture(TestConfigBuilder::new());
    let (_control, mut reply, mut control_client) = ScriptedClient::connected();

    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.get_property(&PLAYER, "Volume").await }
    });
    client.expect("player:getproperty").await;
    assert!(engine.is_busy());

    daemon
        .handle_command(ControlCommand::On, Some(&mut reply))
        .await;
    control_client.expect(BLOCKED_REPLY).await;
    assert!(log.events().is_empty());

    // Signal notices are still counted.
    daemon.handle_command(ControlCommand::Signal, Some(&mut reply)).await;
    assert_eq!(daemon.pending().count(), 1);

    client.send("getproperty").await;
    client.expect("Volume").await;
    client.send("d:0.25").await;
    assert_eq!(
        pending.await.unwrap().unwrap(),
        StructuredValue::Double(0.25)
    );
    assert!(!engine.is_busy());
}

#[test_log::test(tokio::test)]
async fn test_run_follows_control_channel() {
    let Fixture {
        mut daemon, log, ..
    } = fixture(TestConfigBuilder::new());
    let (control, reply, mut control_client) = ScriptedClient::connected();

    let script = tokio::spawn(async move {
        control_client
            .send_all(&["mpris:on", "hello", "MPRIS:OFF", "mpris:on"])
            .await;
        // Dropping the client closes the control channel.
    });

    tokio::time::timeout(Duration::from_secs(5), daemon.run(control, Some(reply)))
        .await
        .expect("daemon did not stop on control EOF")
        .unwrap();
    script.await.unwrap();

    assert_eq!(
        log.events(),
        vec![
            BusEvent::Started,
            BusEvent::Stopped,
            BusEvent::Started,
            BusEvent::Stopped,
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_run_relays_on_timer() {
    let Fixture {
        mut daemon,
        log,
        mut client,
        ..
    } = fixture(TestConfigBuilder::new().start_service(true));
    let (control, _reply, mut control_client) = ScriptedClient::connected();

    let dialogue = tokio::spawn(async move {
        answer_signal(
            &mut client,
            &["org.mpris.MediaPlayer2.Player", "Volume", "property", "d:0.5"],
        )
        .await;
        answer_none_left(&mut client).await;
        client
    });
    let control_script = tokio::spawn(async move {
        control_client.send("mpris:signal").await;
        let _client = dialogue.await.unwrap();
        // Give the reactor a moment to emit before the channel closes.
        tokio::time::sleep(Duration::from_millis(20)).await;
    });

    tokio::time::timeout(Duration::from_secs(5), daemon.run(control, None))
        .await
        .expect("daemon did not stop")
        .unwrap();
    control_script.await.unwrap();

    let events = log.events();
    assert_eq!(events.first(), Some(&BusEvent::Started));
    assert_eq!(events.last(), Some(&BusEvent::Stopped));
    let emitted = log.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].member, "PropertiesChanged");
    assert_eq!(daemon.pending().count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_shutdown_interrupts_silent_client() {
    let Fixture {
        daemon,
        engine,
        log,
        mut client,
    } = fixture(
        TestConfigBuilder::new()
            .start_service(true)
            .signal_poll_interval_ms(10),
    );
    let (shutdown_tx, _) = watch::channel(false);
    let mut daemon = daemon.with_shutdown(shutdown_tx.clone());
    let (control, _reply, mut control_client) = ScriptedClient::connected();
    control_client.send("mpris:signal").await;

    let (asked_tx, asked_rx) = oneshot::channel();
    let dialogue = tokio::spawn(async move {
        client.expect(SIGNAL_INTENT).await;
        let _ = asked_tx.send(());
        // Never answer, but keep the channel open.
        client
    });
    let trigger = tokio::spawn(async move {
        asked_rx.await.unwrap();
        shutdown_tx.send_replace(true);
    });

    tokio::time::timeout(Duration::from_secs(5), daemon.run(control, None))
        .await
        .expect("daemon ignored shutdown while the client was silent")
        .unwrap();
    trigger.await.unwrap();
    let _client = dialogue.await.unwrap();

    assert!(!engine.is_busy());
    assert_eq!(log.events().last(), Some(&BusEvent::Stopped));
    assert!(log.emitted().is_empty());
    drop(control_client);
}
