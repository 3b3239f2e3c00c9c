//! File watching functionality using the notify crate.

use crate::changes::{self, ChangeKind, ChangeNotifier, FileChanges};
use crate::error::{Error, Result};
use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often the polling watcher stats the watched directory.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

const EVENT_CAPACITY: usize = 64;

/// Detects the appearance of a file and changes to it.
#[async_trait]
pub trait FileWatcher: Send + Sync {
    /// Returns once the file exists, or [`Error::Dying`] when `cancel` fires
    /// first.
    async fn block_until_exists(&self, cancel: &CancellationToken) -> Result<()>;

    /// Starts reporting changes to the file, treating `pos` as its last
    /// known size. The subscription ends when `cancel` fires, when the file
    /// is deleted, or when the returned [`FileChanges`] is dropped.
    async fn change_events(&self, cancel: &CancellationToken, pos: u64) -> Result<FileChanges>;

    /// Releases any OS watch held for the file. Safe to call repeatedly.
    fn cleanup(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Native,
    Poll(Duration),
}

impl Backend {
    fn create(self, events: broadcast::Sender<Event>) -> notify::Result<Box<dyn Watcher + Send>> {
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = events.send(event);
            }
            Err(err) => warn!("filesystem watch error: {}", err),
        };

        match self {
            Backend::Native => Ok(Box::new(RecommendedWatcher::new(
                handler,
                Config::default(),
            )?)),
            Backend::Poll(interval) => Ok(Box::new(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(interval),
            )?)),
        }
    }
}

struct Registration {
    _watcher: Box<dyn Watcher + Send>,
    events: broadcast::Sender<Event>,
}

/// OS watches keyed by the directory they watch, with events fanned out to
/// every subscriber.
struct WatchRegistry {
    backend: Backend,
    watches: Mutex<HashMap<PathBuf, Registration>>,
}

impl WatchRegistry {
    fn new(backend: Backend) -> Self {
        Self {
            backend,
            watches: Mutex::new(HashMap::new()),
        }
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<PathBuf, Registration>> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes to events in the directory containing `file`, creating the
    /// OS watch on first use.
    fn subscribe(&self, file: &Path) -> Result<broadcast::Receiver<Event>> {
        let dir = watch_dir(file);
        let mut watches = self.watches();
        if let Some(registration) = watches.get(&dir) {
            return Ok(registration.events.subscribe());
        }

        let (events, receiver) = broadcast::channel(EVENT_CAPACITY);
        let mut watcher = self.backend.create(events.clone())?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!("Watching {} ({:?})", dir.display(), self.backend);

        watches.insert(
            dir,
            Registration {
                _watcher: watcher,
                events,
            },
        );
        Ok(receiver)
    }

    fn remove(&self, file: &Path) -> bool {
        self.watches().remove(&watch_dir(file)).is_some()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.watches().len()
    }
}

/// A [`FileWatcher`] driven by `notify`, either from native OS events or by
/// polling.
pub struct NotifyFileWatcher {
    path: PathBuf,
    file_name: String,
    registry: Arc<WatchRegistry>,
}

impl NotifyFileWatcher {
    /// Watches `path` with the platform's native event source.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_backend(path.as_ref(), Backend::Native)
    }

    /// Watches `path` by scanning its directory every `interval`.
    pub fn polling<P: AsRef<Path>>(path: P, interval: Duration) -> Self {
        Self::with_backend(path.as_ref(), Backend::Poll(interval))
    }

    fn with_backend(path: &Path, backend: Backend) -> Self {
        let path: PathBuf = path.components().collect();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            path,
            file_name,
            registry: Arc::new(WatchRegistry::new(backend)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileWatcher for NotifyFileWatcher {
    async fn block_until_exists(&self, cancel: &CancellationToken) -> Result<()> {
        let mut events = self.registry.subscribe(&self.path)?;
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Dying),
                event = events.recv() => event,
            };

            match event {
                Ok(event) if !is_event_relevant_to_file(&event, &self.file_name) => continue,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    warn!("Watch for {} was released, watching again", self.path.display());
                    events = self.registry.subscribe(&self.path)?;
                }
            }

            if tokio::fs::try_exists(&self.path).await? {
                debug!("{} appeared", self.path.display());
                return Ok(());
            }
        }
    }

    async fn change_events(&self, cancel: &CancellationToken, pos: u64) -> Result<FileChanges> {
        let events = self.registry.subscribe(&self.path)?;
        let (notifier, changes) = changes::channel();
        let subscription = cancel.child_token();

        tokio::spawn(watch_changes(
            Subscription {
                path: self.path.clone(),
                file_name: self.file_name.clone(),
                registry: Arc::clone(&self.registry),
            },
            events,
            notifier,
            subscription.clone(),
            pos,
        ));

        Ok(changes.with_subscription(subscription))
    }

    fn cleanup(&self) {
        if self.registry.remove(&self.path) {
            debug!("Removed watch for {}", self.path.display());
        }
    }
}

/// What a subscription task needs to know about the watched file.
struct Subscription {
    path: PathBuf,
    file_name: String,
    registry: Arc<WatchRegistry>,
}

impl Subscription {
    /// Compares the current size against `size` and reports the difference.
    /// Returns false once the file is gone.
    async fn check_size(
        &self,
        notifier: &ChangeNotifier,
        size: &mut u64,
        catching_up: bool,
    ) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => {
                let kind = if catching_up {
                    catch_up(*size, metadata.len())
                } else {
                    Some(classify_size(*size, metadata.len()))
                };
                if let Some(kind) = kind {
                    notifier.notify(kind);
                }
                *size = metadata.len();
                true
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                notifier.notify_deleted();
                false
            }
            Err(err) => {
                warn!("Failed to stat {}: {}", self.path.display(), err);
                true
            }
        }
    }
}

/// Body of one subscription: turns directory events into change
/// notifications for the file until it is deleted or `cancel` fires.
async fn watch_changes(
    file: Subscription,
    mut events: broadcast::Receiver<Event>,
    notifier: ChangeNotifier,
    cancel: CancellationToken,
    mut size: u64,
) {
    // Catch up on anything written between the reader's end-of-file and the
    // subscription.
    if !file.check_size(&notifier, &mut size, true).await {
        return;
    }

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                if !is_event_relevant_to_file(&event, &file.file_name) {
                    continue;
                }
                debug!("File event detected: {:?}", event.kind);
                match classify_event(&event.kind) {
                    EventClass::Gone => {
                        notifier.notify_deleted();
                        return;
                    }
                    EventClass::Ignored => continue,
                    EventClass::Changed => {}
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!("Skipped {} file events for {}", skipped, file.path.display());
            }
            Err(RecvError::Closed) => {
                warn!("Watch for {} was released, watching again", file.path.display());
                events = match file.registry.subscribe(&file.path) {
                    Ok(events) => events,
                    Err(err) => {
                        warn!("Failed to watch {} again: {}", file.path.display(), err);
                        return;
                    }
                };
                // Events between the release and the new watch were lost.
                if !file.check_size(&notifier, &mut size, true).await {
                    return;
                }
                continue;
            }
        }

        if !file.check_size(&notifier, &mut size, false).await {
            return;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventClass {
    /// The path no longer refers to the file being read.
    Gone,
    /// Contents or metadata may have changed; compare sizes.
    Changed,
    Ignored,
}

fn classify_event(kind: &EventKind) -> EventClass {
    match kind {
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => EventClass::Gone,
        EventKind::Create(_) | EventKind::Access(_) => EventClass::Ignored,
        _ => EventClass::Changed,
    }
}

/// A shrink from a non-empty file counts as truncation. This cannot tell a
/// truncation apart from a smaller replacement file.
fn classify_size(previous: u64, current: u64) -> ChangeKind {
    if previous > 0 && current < previous {
        ChangeKind::Truncated
    } else {
        ChangeKind::Modified
    }
}

fn catch_up(previous: u64, current: u64) -> Option<ChangeKind> {
    (previous != current).then(|| classify_size(previous, current))
}

/// Directory to watch for `file`; relative bare names resolve to `.`.
fn watch_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Check if a notify event is relevant to a specific file
pub(crate) fn is_event_relevant_to_file(event: &Event, target_file_name: &str) -> bool {
    event.paths.iter().any(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy() == target_file_name)
            .unwrap_or(false)
    })
}
