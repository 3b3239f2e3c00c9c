//! Buffered line reading with logical offset tracking.

use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::Mutex;

/// Outcome of one read attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadLine {
    /// A full record, newline stripped.
    Complete(Vec<u8>),
    /// End-of-file was reached. Holds the bytes of an unterminated record,
    /// which may be empty.
    Eof(Vec<u8>),
}

/// Owns the open file and its read buffer.
#[derive(Debug)]
pub(crate) struct LineReader {
    inner: BufReader<File>,
    /// Partial record kept across end-of-file when the file cannot be rewound.
    pending: Vec<u8>,
}

impl LineReader {
    pub(crate) async fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(file))
    }

    pub(crate) fn new(file: File) -> Self {
        Self {
            inner: BufReader::new(file),
            pending: Vec::new(),
        }
    }

    pub(crate) async fn read_line(&mut self) -> io::Result<ReadLine> {
        let mut buf = std::mem::take(&mut self.pending);
        self.inner.read_until(b'\n', &mut buf).await?;
        if strip_newline(&mut buf) {
            Ok(ReadLine::Complete(buf))
        } else {
            Ok(ReadLine::Eof(buf))
        }
    }

    /// Keeps a partial record in memory to prefix the next read.
    pub(crate) fn retain_partial(&mut self, partial: Vec<u8>) {
        self.pending = partial;
    }

    /// Logical offset: the file position minus everything read ahead but not
    /// yet returned as a complete line.
    pub(crate) async fn tell(&mut self) -> io::Result<u64> {
        let position = self.inner.get_mut().stream_position().await?;
        let unconsumed = (self.inner.buffer().len() + self.pending.len()) as u64;
        Ok(position.saturating_sub(unconsumed))
    }

    /// Seeks the file and drops any read-ahead.
    pub(crate) async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pending.clear();
        let position = match pos {
            SeekFrom::Current(delta) => {
                let logical = self.tell().await?;
                let target = logical.checked_add_signed(delta).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
                })?;
                SeekFrom::Start(target)
            }
            other => other,
        };
        self.inner.seek(position).await
    }
}

/// A reader shared between the reading task and offset queries.
///
/// The reading task holds the lock only for the duration of a single read or
/// seek; `tell` takes it briefly to read the buffered byte count.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedReader {
    inner: Arc<Mutex<Option<LineReader>>>,
}

impl SharedReader {
    pub(crate) fn with_reader(reader: Option<LineReader>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
        }
    }

    pub(crate) async fn replace(&self, reader: LineReader) {
        *self.inner.lock().await = Some(reader);
    }

    pub(crate) async fn close(&self) {
        self.inner.lock().await.take();
    }

    pub(crate) async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Logical offset, or 0 when no file is open.
    pub(crate) async fn tell(&self) -> io::Result<u64> {
        match self.inner.lock().await.as_mut() {
            Some(reader) => reader.tell().await,
            None => Ok(0),
        }
    }

    pub(crate) async fn read_line(&self) -> io::Result<ReadLine> {
        self.inner.lock().await.as_mut().ok_or_else(not_open)?.read_line().await
    }

    pub(crate) async fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.lock().await.as_mut().ok_or_else(not_open)?.seek(pos).await
    }

    pub(crate) async fn retain_partial(&self, partial: Vec<u8>) -> io::Result<()> {
        self.inner
            .lock()
            .await
            .as_mut()
            .ok_or_else(not_open)?
            .retain_partial(partial);
        Ok(())
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "file is not open")
}

/// Removes one trailing newline. Returns whether there was one.
fn strip_newline(buf: &mut Vec<u8>) -> bool {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        true
    } else {
        false
    }
}

/// Decodes record bytes, replacing invalid UTF-8.
pub(crate) fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}
