//! The tail controller: reads lines, waits for changes, reopens rotated files.

use crate::changes::{ChangeKind, FileChanges};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::reader::{self, LineReader, ReadLine, SharedReader};
use crate::stream::{Line, Lines};
use crate::watcher::{FileWatcher, NotifyFileWatcher, POLL_INTERVAL};
use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Control handle for a running tail. Clones refer to the same tail.
#[derive(Clone)]
pub struct Tail {
    path: PathBuf,
    pipe: bool,
    lifecycle: Lifecycle,
    reader: SharedReader,
    watcher: Arc<dyn FileWatcher>,
}

impl fmt::Debug for Tail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tail")
            .field("path", &self.path)
            .field("pipe", &self.pipe)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Tail {
    /// Starts tailing `path` in a background task and returns the control
    /// handle together with the stream of lines.
    ///
    /// With `must_exist` the file is opened here and a missing file is an
    /// error; otherwise the background task waits for it to appear.
    pub async fn start<P: AsRef<Path>>(path: P, config: Config) -> Result<(Tail, Lines)> {
        let path = path.as_ref();
        let watcher: Arc<dyn FileWatcher> = if config.poll {
            Arc::new(NotifyFileWatcher::polling(path, POLL_INTERVAL))
        } else {
            Arc::new(NotifyFileWatcher::new(path))
        };
        Self::with_watcher(path, config, watcher).await
    }

    /// Like [`Tail::start`], but change detection comes from `watcher`
    /// instead of a [`NotifyFileWatcher`]. `config.poll` is ignored.
    pub async fn with_watcher<P: AsRef<Path>>(
        path: P,
        config: Config,
        watcher: Arc<dyn FileWatcher>,
    ) -> Result<(Tail, Lines)> {
        let path = path.as_ref().to_path_buf();
        let reader = if config.must_exist {
            let reader = LineReader::open(&path)
                .await
                .map_err(|err| Error::open(&path, err))?;
            Some(reader)
        } else {
            None
        };

        let tail = Tail {
            path,
            pipe: config.pipe,
            lifecycle: Lifecycle::new(),
            reader: SharedReader::with_reader(reader),
            watcher,
        };
        let (tx, lines) = Lines::channel();

        let follower = Follower {
            path: tail.path.clone(),
            config,
            lifecycle: tail.lifecycle.clone(),
            reader: tail.reader.clone(),
            watcher: Arc::clone(&tail.watcher),
            changes: None,
            lines: tx,
        };
        tokio::spawn(follower.run());

        Ok((tail, lines))
    }

    pub fn filename(&self) -> &Path {
        &self.path
    }

    /// The offset of the first byte not yet returned as a complete line, or
    /// 0 when no file is open.
    ///
    /// A pipe has no position, so in `pipe` mode this fails without waiting
    /// for a read that may be blocked on the writer.
    pub async fn tell(&self) -> Result<u64> {
        if self.pipe {
            return Err(Error::seek(
                &self.path,
                io::Error::new(io::ErrorKind::Unsupported, "a pipe has no position"),
            ));
        }
        self.reader
            .tell()
            .await
            .map_err(|err| Error::seek(&self.path, err))
    }

    /// Stops at the next opportunity. `wait` then returns `Ok`.
    pub fn stop(&self) {
        self.lifecycle.kill(None);
    }

    /// Stops once every line up to end-of-file has been delivered. A later
    /// [`Tail::kill`] still cuts the flush short.
    pub fn stop_at_eof(&self) {
        self.lifecycle.kill(Some(Error::StopAtEof));
    }

    /// Stops at the next opportunity with `err` as the outcome, unless an
    /// outcome was already decided. A pending [`Tail::stop_at_eof`] does not
    /// count as decided.
    pub fn kill(&self, err: Error) {
        self.lifecycle.kill(Some(err));
    }

    /// Waits for the background task to finish and returns its outcome.
    pub async fn wait(&self) -> Result<()> {
        self.lifecycle.wait().await
    }

    pub fn is_done(&self) -> bool {
        self.lifecycle.is_done()
    }

    /// Releases the OS watch kept for the file. Safe to call any number of
    /// times; usually called after `wait` returns. A tail that is still
    /// running sets up a new watch when it next waits for changes.
    pub fn cleanup(&self) {
        self.watcher.cleanup();
    }
}

/// What to do after waiting for a change.
enum Step {
    Read,
    Stop,
}

/// The background reading task. Sole owner of the file generation and the
/// current change subscription.
struct Follower {
    path: PathBuf,
    config: Config,
    lifecycle: Lifecycle,
    reader: SharedReader,
    watcher: Arc<dyn FileWatcher>,
    changes: Option<FileChanges>,
    lines: mpsc::Sender<Line>,
}

impl Follower {
    async fn run(mut self) {
        match self.follow().await {
            Ok(()) | Err(Error::Dying) => debug!("Stopped tailing {}", self.path.display()),
            Err(err) => {
                error!("Tail of {} failed: {}", self.path.display(), err);
                self.lifecycle.kill(Some(err.clone()));
                let _ = self.lines.try_send(Line::failed(err));
            }
        }

        self.changes = None;
        self.reader.close().await;
        self.lifecycle.done();
    }

    async fn follow(&mut self) -> Result<()> {
        if !self.reader.is_open().await {
            self.reopen().await?;
        }
        if let Some(location) = self.config.location {
            let pos = location
                .to_seek_from()
                .map_err(|err| Error::seek(&self.path, err))?;
            self.seek(pos).await?;
        }

        loop {
            let offset = if self.config.pipe {
                None
            } else {
                Some(self.tell().await?)
            };

            match self.read_line().await? {
                ReadLine::Complete(bytes) => {
                    if !self.send_line(bytes).await {
                        return Ok(());
                    }
                }
                ReadLine::Eof(partial) => {
                    if !self.config.follow || self.lifecycle.stopping_at_eof() {
                        if !partial.is_empty() {
                            self.send_line(partial).await;
                        }
                        return Ok(());
                    }
                    if !partial.is_empty() {
                        self.unread(offset, partial).await?;
                    }
                    match self.wait_for_changes().await? {
                        Step::Read => {}
                        Step::Stop => return Ok(()),
                    }
                }
            }

            if self.lifecycle.is_dying() && !self.lifecycle.stopping_at_eof() {
                return Ok(());
            }
        }
    }

    async fn wait_for_changes(&mut self) -> Result<Step> {
        let mut changes = match self.changes.take() {
            Some(changes) => changes,
            None => {
                let pos = if self.config.pipe { 0 } else { self.tell().await? };
                self.watcher.change_events(self.lifecycle.token(), pos).await?
            }
        };

        match changes.wait(self.lifecycle.token()).await {
            Some(ChangeKind::Modified) => {
                self.changes = Some(changes);
                Ok(Step::Read)
            }
            Some(ChangeKind::Truncated) => {
                drop(changes);
                info!("Re-opening truncated file {}", self.path.display());
                self.reopen().await?;
                info!("Successfully reopened truncated {}", self.path.display());
                Ok(Step::Read)
            }
            Some(ChangeKind::Deleted) => {
                drop(changes);
                if !self.drain().await? {
                    return Ok(Step::Stop);
                }
                if self.config.reopen {
                    info!("Re-opening moved/deleted file {}", self.path.display());
                    self.reopen().await?;
                    info!("Successfully reopened {}", self.path.display());
                    Ok(Step::Read)
                } else {
                    info!("Stopping tail as file no longer exists: {}", self.path.display());
                    Ok(Step::Stop)
                }
            }
            None => {
                self.changes = Some(changes);
                if self.lifecycle.stopping_at_eof() {
                    Ok(Step::Read)
                } else {
                    Ok(Step::Stop)
                }
            }
        }
    }

    /// Delivers whatever is left in the current file generation, including
    /// an unterminated last line. Returns false if delivery was cut short.
    async fn drain(&mut self) -> Result<bool> {
        loop {
            match self.read_line().await? {
                ReadLine::Complete(bytes) => {
                    if !self.send_line(bytes).await {
                        return Ok(false);
                    }
                }
                ReadLine::Eof(partial) => {
                    return Ok(partial.is_empty() || self.send_line(partial).await);
                }
            }
        }
    }

    /// Closes the current file and opens the path again, waiting for it to
    /// be created if needed.
    async fn reopen(&mut self) -> Result<()> {
        self.changes = None;
        self.reader.close().await;

        loop {
            match LineReader::open(&self.path).await {
                Ok(reader) => {
                    self.reader.replace(reader).await;
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    info!("Waiting for {} to appear...", self.path.display());
                    self.watcher
                        .block_until_exists(self.lifecycle.token())
                        .await?;
                }
                Err(err) => return Err(Error::open(&self.path, err)),
            }
        }
    }

    /// Puts an unterminated line back so the next read sees it whole.
    async fn unread(&mut self, offset: Option<u64>, partial: Vec<u8>) -> Result<()> {
        match offset {
            Some(offset) => self.seek(SeekFrom::Start(offset)).await,
            None => self
                .reader
                .retain_partial(partial)
                .await
                .map_err(|err| Error::read(&self.path, err)),
        }
    }

    /// Hands a line to the consumer. Gives up when the tail starts dying;
    /// while flushing to end-of-file it gives up only once the flush is
    /// abandoned. Returns whether it was delivered.
    async fn send_line(&self, bytes: Vec<u8>) -> bool {
        let permit = tokio::select! {
            permit = self.lines.reserve() => permit,
            _ = self.lifecycle.dying() => {
                tokio::select! {
                    biased;
                    _ = self.lifecycle.abandoned() => return false,
                    permit = self.lines.reserve() => permit,
                }
            }
        };

        match permit {
            Ok(permit) => {
                permit.send(Line::new(reader::decode(bytes)));
                true
            }
            Err(_) => {
                debug!("Line consumer for {} went away", self.path.display());
                false
            }
        }
    }

    async fn read_line(&self) -> Result<ReadLine> {
        self.reader
            .read_line()
            .await
            .map_err(|err| Error::read(&self.path, err))
    }

    async fn tell(&self) -> Result<u64> {
        self.reader
            .tell()
            .await
            .map_err(|err| Error::seek(&self.path, err))
    }

    async fn seek(&self, pos: SeekFrom) -> Result<()> {
        self.reader
            .seek(pos)
            .await
            .map(|_| ())
            .map_err(|err| Error::seek(&self.path, err))
    }
}
