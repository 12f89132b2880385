//! Line-oriented I/O over the client pipes.
//!
//! Every protocol exchange is a sequence of newline-terminated lines. A
//! [`LineReader`] strips terminators and keeps one growable buffer for the
//! lifetime of the pipe; a [`LineWriter`] flushes after every line because
//! the protocol is strictly request/response.
//!
//! Transient read failures (`EINTR`, `EAGAIN`) are retried after a short
//! sleep until shutdown is requested through the watch channel handed to
//! [`LineReader::with_shutdown`].

use std::borrow::Cow;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::BoxFuture;

/// Buffer capacity used when the descriptor does not report a block size.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Pause between retries of an interrupted read.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Why a line could not be read or written.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The peer closed its end cleanly.
    #[error("channel closed")]
    Closed,

    /// An I/O failure that is not worth retrying.
    #[error("channel broken: {0}")]
    Broken(#[source] io::Error),

    /// Shutdown was requested while waiting for data.
    #[error("read aborted by shutdown")]
    Aborted,
}

/// One line as handed to higher layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line<'a> {
    /// Content without the trailing newline.
    pub text: Cow<'a, str>,
    /// `false` for a final partial line cut off by end-of-file.
    pub terminated: bool,
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Reading half of a line channel.
pub struct LineReader {
    inner: BufReader<BoxedReader>,
    buf: Vec<u8>,
    retry_delay: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl LineReader {
    /// Wrap `reader` with the default buffer size.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::with_capacity(reader, DEFAULT_BUFFER_SIZE)
    }

    /// `capacity` is only the starting size; long lines grow the buffer.
    pub fn with_capacity(reader: impl AsyncRead + Send + Unpin + 'static, capacity: usize) -> Self {
        let boxed: BoxedReader = Box::new(reader);
        Self {
            inner: BufReader::with_capacity(capacity, boxed),
            buf: Vec::with_capacity(capacity),
            retry_delay: DEFAULT_RETRY_DELAY,
            shutdown: None,
        }
    }

    /// Open a pipe, FIFO or `/dev/fd/<n>` path, sizing the buffer from the
    /// descriptor's preferred block size.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let capacity = preferred_block_size(&file).await;
        debug!(path = %path.as_ref().display(), capacity, "Opened line reader");
        Ok(Self::with_capacity(file, capacity))
    }

    /// Pause between attempts after a transient read failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Abort reads (and pending retries) once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Current buffer capacity; grows when a line outgrows it, never shrinks.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Read the next line, stripping `\n` (and a preceding `\r`).
    pub async fn read_line(&mut self) -> Result<Line<'_>, ChannelError> {
        self.buf.clear();
        loop {
            if self.shutdown_requested() {
                return Err(ChannelError::Aborted);
            }
            let result = match self.shutdown.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        biased;
                        () = wait_for_shutdown(rx) => return Err(ChannelError::Aborted),
                        r = self.inner.read_until(b'\n', &mut self.buf) => r,
                    }
                }
                None => self.inner.read_until(b'\n', &mut self.buf).await,
            };

            match result {
                Ok(0) if self.buf.is_empty() => return Err(ChannelError::Closed),
                Ok(_) => break,
                Err(e) if is_transient(&e) => {
                    if self.shutdown_requested() {
                        return Err(ChannelError::Aborted);
                    }
                    trace!(error = %e, "Transient read failure, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(ChannelError::Broken(e)),
            }
        }

        let terminated = self.buf.last() == Some(&b'\n');
        let mut end = self.buf.len();
        if terminated {
            end -= 1;
            if end > 0 && self.buf[end - 1] == b'\r' {
                end -= 1;
            }
        }
        Ok(Line {
            text: String::from_utf8_lossy(&self.buf[..end]),
            terminated,
        })
    }
}

/// Writing half of a line channel.
pub struct LineWriter {
    inner: BoxedWriter,
}

impl LineWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Open an existing pipe, FIFO or `/dev/fd/<n>` path for writing.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path.as_ref())
            .await?;
        debug!(path = %path.as_ref().display(), "Opened line writer");
        Ok(Self::new(file))
    }

    /// Write `text` plus a newline and flush before returning.
    pub async fn write_line(&mut self, text: &str) -> Result<(), ChannelError> {
        write_and_flush(&mut self.inner, text)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::BrokenPipe => ChannelError::Closed,
                _ => ChannelError::Broken(e),
            })
    }
}

async fn write_and_flush(w: &mut BoxedWriter, text: &str) -> io::Result<()> {
    w.write_all(text.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await
}

/// The dialogue pipe pair: one reader, one writer.
pub struct LineChannel {
    reader: LineReader,
    writer: LineWriter,
}

impl LineChannel {
    /// Pair a reader and writer for a dialogue.
    pub fn new(reader: LineReader, writer: LineWriter) -> Self {
        Self { reader, writer }
    }

    pub async fn read_line(&mut self) -> Result<Line<'_>, ChannelError> {
        self.reader.read_line().await
    }

    pub async fn write_line(&mut self, text: &str) -> Result<(), ChannelError> {
        self.writer.write_line(text).await
    }
}

/// Something lines can be pulled from; the decoder reads through this.
pub trait LineSource: Send {
    fn next_line(&mut self) -> BoxFuture<'_, Result<String, ChannelError>>;
}

/// Something lines can be pushed into; the encoder writes through this.
pub trait LineSink: Send {
    fn send_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<(), ChannelError>>;
}

impl LineSource for LineReader {
    fn next_line(&mut self) -> BoxFuture<'_, Result<String, ChannelError>> {
        Box::pin(async move { Ok(self.read_line().await?.text.into_owned()) })
    }
}

impl LineSink for LineWriter {
    fn send_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(self.write_line(line))
    }
}

impl LineSource for LineChannel {
    fn next_line(&mut self) -> BoxFuture<'_, Result<String, ChannelError>> {
        self.reader.next_line()
    }
}

impl LineSink for LineChannel {
    fn send_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<(), ChannelError>> {
        self.writer.send_line(line)
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    // A dropped sender can never request shutdown.
    if rx.wait_for(|quit| *quit).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn preferred_block_size(file: &tokio::fs::File) -> usize {
    use std::os::unix::fs::MetadataExt;

    match file.metadata().await {
        Ok(meta) if meta.blksize() > 0 => {
            usize::try_from(meta.blksize()).unwrap_or(DEFAULT_BUFFER_SIZE)
        }
        _ => DEFAULT_BUFFER_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, ReadBuf};

    use super::*;

    /// Fails with `kind` a number of times before serving `data`.
    struct FlakyReader {
        failures: usize,
        kind: io::ErrorKind,
        data: &'static [u8],
    }

    impl AsyncRead for FlakyReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.failures > 0 {
                self.failures -= 1;
                return Poll::Ready(Err(io::Error::from(self.kind)));
            }
            let n = self.data.len().min(buf.remaining());
            buf.put_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_reads_lines_without_terminators() {
        let mut reader = LineReader::new(&b"first\nsecond\r\n\nlast"[..]);

        let line = reader.read_line().await.unwrap();
        assert_eq!(line.text, "first");
        assert!(line.terminated);
        assert_eq!(reader.read_line().await.unwrap().text, "second");
        assert_eq!(reader.read_line().await.unwrap().text, "");

        let last = reader.read_line().await.unwrap();
        assert_eq!(last.text, "last");
        assert!(!last.terminated);

        assert!(matches!(reader.read_line().await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let mut reader = LineReader::new(&b"ab\xffcd\n"[..]);
        let line = reader.read_line().await.unwrap();
        assert_eq!(line.text, "ab\u{fffd}cd");
    }

    #[tokio::test]
    async fn test_buffer_grows_for_long_lines() {
        let long = std::io::Cursor::new(format!("{}\n", "x".repeat(100)).into_bytes());
        let mut reader = LineReader::with_capacity(long, 16);
        let line = reader.read_line().await.unwrap();
        assert_eq!(line.text.len(), 100);
        assert!(reader.capacity() >= 100);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let flaky = FlakyReader {
            failures: 2,
            kind: io::ErrorKind::Interrupted,
            data: b"after retry\n",
        };
        let mut reader = LineReader::new(flaky).with_retry_delay(Duration::from_millis(1));
        assert_eq!(reader.read_line().await.unwrap().text, "after retry");
    }

    #[tokio::test]
    async fn test_permanent_error_is_broken() {
        let flaky = FlakyReader {
            failures: 1,
            kind: io::ErrorKind::PermissionDenied,
            data: b"never\n",
        };
        let mut reader = LineReader::new(flaky);
        assert!(matches!(
            reader.read_line().await,
            Err(ChannelError::Broken(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_retry_loop() {
        let (tx, rx) = watch::channel(false);
        let flaky = FlakyReader {
            failures: usize::MAX,
            kind: io::ErrorKind::WouldBlock,
            data: b"",
        };
        let mut reader = LineReader::new(flaky)
            .with_retry_delay(Duration::from_millis(5))
            .with_shutdown(rx);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
            tx
        });
        assert!(matches!(reader.read_line().await, Err(ChannelError::Aborted)));
        drop(stopper.await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_read() {
        let (tx, rx) = watch::channel(false);
        let (_client, ours) = tokio::io::duplex(64);
        let mut reader = LineReader::new(ours).with_shutdown(rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        assert!(matches!(reader.read_line().await, Err(ChannelError::Aborted)));
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_does_not_abort() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let mut reader = LineReader::new(&b"still here\n"[..]).with_shutdown(rx);
        assert_eq!(reader.read_line().await.unwrap().text, "still here");
    }

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let (mut client, ours) = tokio::io::duplex(64);
        let mut writer = LineWriter::new(ours);
        writer.write_line("player:method").await.unwrap();
        writer.write_line("").await.unwrap();
        drop(writer);

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "player:method\n\n");
    }

    #[tokio::test]
    async fn test_write_to_closed_peer_fails() {
        let (client, ours) = tokio::io::duplex(64);
        drop(client);
        let mut writer = LineWriter::new(ours);
        assert!(writer.write_line("anyone?").await.is_err());
    }

    #[tokio::test]
    async fn test_open_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipe");
        tokio::fs::write(&path, "from file\n").await.unwrap();

        let mut reader = LineReader::open(&path).await.unwrap();
        assert!(reader.capacity() > 0);
        assert_eq!(reader.read_line().await.unwrap().text, "from file");

        let mut writer = LineWriter::open(&path).await.unwrap();
        writer.write_line("over").await.unwrap();
        drop(writer);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with("over\n"));
    }

    #[tokio::test]
    async fn test_channel_implements_source_and_sink() {
        let (client, ours) = tokio::io::duplex(256);
        let (read_half, write_half) = tokio::io::split(ours);
        let mut channel = LineChannel::new(LineReader::new(read_half), LineWriter::new(write_half));
        let (client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"ack\n").await.unwrap();
        assert_eq!(channel.next_line().await.unwrap(), "ack");

        channel.send_line("subject").await.unwrap();
        let mut client_reader = LineReader::new(client_read);
        assert_eq!(client_reader.read_line().await.unwrap().text, "subject");
    }
}
