//! In-memory dialogue partner for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::channel::{ChannelError, LineSink, LineSource};
use crate::BoxFuture;

/// What a [`Transcript`] does once its scripted replies run out.
#[derive(Clone, Copy)]
pub(crate) enum WhenExhausted {
    /// Never answer; the reader waits forever.
    Hang,
    /// Report the channel as closed.
    Close,
}

/// Replays canned client replies and records every line written to it.
pub(crate) struct Transcript {
    replies: VecDeque<String>,
    written: Arc<Mutex<Vec<String>>>,
    exhausted: WhenExhausted,
    fail_writes: bool,
}

#[derive(Clone)]
pub(crate) struct Written(Arc<Mutex<Vec<String>>>);

impl Written {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Transcript {
    pub(crate) fn new(replies: &[&str]) -> (Self, Written) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let transcript = Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            written: written.clone(),
            exhausted: WhenExhausted::Close,
            fail_writes: false,
        };
        (transcript, Written(written))
    }

    pub(crate) fn when_exhausted(mut self, behaviour: WhenExhausted) -> Self {
        self.exhausted = behaviour;
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

impl LineSource for Transcript {
    fn next_line(&mut self) -> BoxFuture<'_, Result<String, ChannelError>> {
        let next = self.replies.pop_front();
        let exhausted = self.exhausted;
        Box::pin(async move {
            match (next, exhausted) {
                (Some(line), _) => Ok(line),
                (None, WhenExhausted::Close) => Err(ChannelError::Closed),
                (None, WhenExhausted::Hang) => std::future::pending().await,
            }
        })
    }
}

impl LineSink for Transcript {
    fn send_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<(), ChannelError>> {
        let result = if self.fail_writes {
            Err(ChannelError::Closed)
        } else {
            self.written.lock().unwrap().push(line.to_string());
            Ok(())
        };
        Box::pin(async move { result })
    }
}
