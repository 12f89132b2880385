//! A scripted stand-in for the line client.
//!
//! [`ScriptedClient`] holds the far end of in-memory pipes. Tests hand the
//! near end to the code under test and then play the client's part line by
//! line.

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{duplex, split};

use mprisline_core::channel::{ChannelError, LineChannel, LineReader, LineWriter};

const PIPE_CAPACITY: usize = 64 * 1024;

/// How long [`ScriptedClient::expect`] waits before failing the test.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ScriptedClient {
    reader: LineReader,
    writer: LineWriter,
}

impl ScriptedClient {
    /// A connected pair: the daemon's reader and writer, and the client.
    pub fn connected() -> (LineReader, LineWriter, Self) {
        let (near, far) = duplex(PIPE_CAPACITY);
        let (near_read, near_write) = split(near);
        let (far_read, far_write) = split(far);
        let client = Self {
            reader: LineReader::new(far_read),
            writer: LineWriter::new(far_write),
        };
        (LineReader::new(near_read), LineWriter::new(near_write), client)
    }

    /// A dialogue channel for a `ProtocolEngine`, and its client.
    pub fn channel() -> (LineChannel, Self) {
        let (reader, writer, client) = Self::connected();
        (LineChannel::new(reader, writer), client)
    }

    /// Next line from the daemon.
    pub async fn recv(&mut self) -> Result<String, ChannelError> {
        self.reader
            .read_line()
            .await
            .map(|line| line.text.into_owned())
    }

    /// Assert that the daemon's next line is `expected`.
    pub async fn expect(&mut self, expected: &str) {
        let line = tokio::time::timeout(EXPECT_TIMEOUT, self.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"))
            .unwrap_or_else(|e| panic!("channel failed waiting for {expected:?}: {e}"));
        assert_eq!(line, expected);
    }

    /// Assert the next lines in order.
    pub async fn expect_all(&mut self, expected: &[&str]) {
        for line in expected {
            self.expect(line).await;
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_line(line)
            .await
            .expect("daemon end of the pipe closed");
    }

    pub async fn send_all(&mut self, lines: &[&str]) {
        for line in lines {
            self.send(line).await;
        }
    }

    /// Answer a handshake: expect `intent`, ack, expect `subject`, send
    /// `payload`.
    pub async fn handshake(&mut self, intent: &str, ack: &str, subject: &str, payload: &str) {
        self.expect(intent).await;
        self.send(ack).await;
        self.expect(subject).await;
        self.send(payload).await;
    }
}
