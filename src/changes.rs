//! Coalescing change notifications passed from a watcher to the reader.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What happened to the watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modified,
    Truncated,
    Deleted,
}

/// Producer side. Each kind holds at most one pending notification; repeats
/// before the consumer wakes up collapse into one.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    modified: mpsc::Sender<()>,
    truncated: mpsc::Sender<()>,
    deleted: mpsc::Sender<()>,
}

/// Consumer side, owned by the reader for one file generation.
#[derive(Debug)]
pub struct FileChanges {
    modified: mpsc::Receiver<()>,
    truncated: mpsc::Receiver<()>,
    deleted: mpsc::Receiver<()>,
    subscription: Option<CancellationToken>,
}

/// Creates a connected notifier/changes pair.
pub fn channel() -> (ChangeNotifier, FileChanges) {
    let (modified_tx, modified) = mpsc::channel(1);
    let (truncated_tx, truncated) = mpsc::channel(1);
    let (deleted_tx, deleted) = mpsc::channel(1);

    let notifier = ChangeNotifier {
        modified: modified_tx,
        truncated: truncated_tx,
        deleted: deleted_tx,
    };
    let changes = FileChanges {
        modified,
        truncated,
        deleted,
        subscription: None,
    };
    (notifier, changes)
}

impl ChangeNotifier {
    pub fn notify_modified(&self) {
        let _ = self.modified.try_send(());
    }

    pub fn notify_truncated(&self) {
        let _ = self.truncated.try_send(());
    }

    pub fn notify_deleted(&self) {
        let _ = self.deleted.try_send(());
    }

    pub fn notify(&self, kind: ChangeKind) {
        match kind {
            ChangeKind::Modified => self.notify_modified(),
            ChangeKind::Truncated => self.notify_truncated(),
            ChangeKind::Deleted => self.notify_deleted(),
        }
    }
}

impl FileChanges {
    /// Ties the producing task's lifetime to this value: dropping the
    /// changes cancels `subscription`.
    pub(crate) fn with_subscription(mut self, subscription: CancellationToken) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Waits for the next pending notification and clears it. Returns `None`
    /// once `cancel` fires.
    ///
    /// When several kinds are pending, Deleted comes before Truncated and
    /// Truncated before Modified, so growth after a truncation is never read
    /// at the old offset.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Option<ChangeKind> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            Some(()) = self.deleted.recv() => Some(ChangeKind::Deleted),
            Some(()) = self.truncated.recv() => Some(ChangeKind::Truncated),
            Some(()) = self.modified.recv() => Some(ChangeKind::Modified),
        }
    }
}

impl Drop for FileChanges {
    fn drop(&mut self) {
        if let Some(subscription) = &self.subscription {
            subscription.cancel();
        }
    }
}
