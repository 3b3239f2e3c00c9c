//! The stream of lines produced by a tail.

use crate::error::Error;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// One record read from the file.
#[derive(Debug, Clone)]
pub struct Line {
    /// The record with its trailing newline removed.
    pub text: String,
    /// When the record was read.
    pub time: DateTime<Utc>,
    /// Set on the final record of a tail that failed.
    pub err: Option<Error>,
}

impl Line {
    pub(crate) fn new(text: String) -> Self {
        Self {
            text,
            time: Utc::now(),
            err: None,
        }
    }

    pub(crate) fn failed(err: Error) -> Self {
        Self {
            text: String::new(),
            time: Utc::now(),
            err: Some(err),
        }
    }
}

/// Lines in file order. Ends when the tail stops.
///
/// The channel holds a single line, so a slow consumer holds back the
/// reader. Dropping `Lines` makes the tail stop at its next delivery.
#[derive(Debug)]
pub struct Lines {
    receiver: mpsc::Receiver<Line>,
}

impl Lines {
    pub(crate) fn channel() -> (mpsc::Sender<Line>, Self) {
        let (tx, rx) = mpsc::channel(1);
        (tx, Self { receiver: rx })
    }

    /// Receives the next line, or `None` once the tail has stopped.
    pub async fn next_line(&mut self) -> Option<Line> {
        self.receiver.recv().await
    }

    /// Check if the producing tail has gone away
    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

impl Stream for Lines {
    type Item = Line;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}
