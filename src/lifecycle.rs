//! Cancellation, termination reason and completion for one background task.

use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug, Default)]
enum Reason {
    #[default]
    Alive,
    Dying(Option<Error>),
}

#[derive(Debug, Default)]
struct Inner {
    dying: CancellationToken,
    /// Fired once no flush to end-of-file is pending anymore.
    abandoned: CancellationToken,
    dead: CancellationToken,
    reason: Mutex<Reason>,
}

/// Tracks the life of a background task.
///
/// The first call to [`Lifecycle::kill`] decides the outcome, even when the
/// reason it carries is `None`. The one exception is a pending
/// [`Error::StopAtEof`], which a later error replaces so that a flush stuck
/// on a stalled consumer can still be cut short. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    fn reason(&self) -> MutexGuard<'_, Reason> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts the task into the dying state, recording `reason` if no reason
    /// was recorded before or if it replaces a pending stop-at-eof.
    pub fn kill(&self, reason: Option<Error>) {
        let flushing = {
            let mut current = self.reason();
            let replace = match &*current {
                Reason::Alive => true,
                Reason::Dying(Some(Error::StopAtEof)) => {
                    matches!(&reason, Some(err) if !matches!(err, Error::StopAtEof))
                }
                Reason::Dying(_) => false,
            };
            if replace {
                *current = Reason::Dying(reason);
            }
            matches!(*current, Reason::Dying(Some(Error::StopAtEof)))
        };

        self.inner.dying.cancel();
        if !flushing {
            self.inner.abandoned.cancel();
        }
    }

    /// Resolves once the task starts dying.
    pub fn dying(&self) -> WaitForCancellationFuture<'_> {
        self.inner.dying.cancelled()
    }

    /// Resolves once the task is dying and not flushing to end-of-file.
    pub(crate) fn abandoned(&self) -> WaitForCancellationFuture<'_> {
        self.inner.abandoned.cancelled()
    }

    pub fn is_dying(&self) -> bool {
        self.inner.dying.is_cancelled()
    }

    /// The dying signal as a token, for handing to watchers.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.dying
    }

    /// The recorded reason, if the task is dying with one.
    pub fn err(&self) -> Option<Error> {
        match &*self.reason() {
            Reason::Dying(reason) => reason.clone(),
            Reason::Alive => None,
        }
    }

    /// True when dying because a flush to end-of-file was requested.
    pub(crate) fn stopping_at_eof(&self) -> bool {
        matches!(&*self.reason(), Reason::Dying(Some(Error::StopAtEof)))
    }

    /// Marks the task as finished. Called once by the task itself.
    pub(crate) fn done(&self) {
        self.kill(None);
        self.inner.dead.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.inner.dead.is_cancelled()
    }

    /// Waits for the task to finish and returns its outcome.
    pub async fn wait(&self) -> Result<()> {
        self.inner.dead.cancelled().await;
        match self.err() {
            None | Some(Error::StopAtEof) => Ok(()),
            Some(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_new_lifecycle_is_alive() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_dying());
        assert!(!lifecycle.is_done());
        assert!(lifecycle.err().is_none());
    }

    #[test]
    fn test_first_kill_wins() {
        let lifecycle = Lifecycle::new();
        lifecycle.kill(Some(Error::killed("x")));
        lifecycle.kill(Some(Error::killed("y")));

        match lifecycle.err() {
            Some(Error::Killed(reason)) => assert_eq!(reason, "x"),
            other => panic!("Expected first kill reason, got {:?}", other),
        }
    }

    #[test]
    fn test_graceful_kill_is_not_overwritten() {
        let lifecycle = Lifecycle::new();
        lifecycle.kill(None);
        lifecycle.kill(Some(Error::killed("late")));

        assert!(lifecycle.is_dying());
        assert!(lifecycle.err().is_none());
    }

    #[test]
    fn test_dying_resolves_after_kill() {
        let lifecycle = Lifecycle::new();
        let mut dying = task::spawn(lifecycle.dying());
        assert_pending!(dying.poll());

        lifecycle.kill(None);
        assert!(dying.is_woken());
        assert_ready!(dying.poll());
    }

    #[test]
    fn test_stopping_at_eof() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.stopping_at_eof());

        lifecycle.kill(Some(Error::StopAtEof));
        assert!(lifecycle.stopping_at_eof());
    }

    #[test]
    fn test_error_replaces_pending_stop_at_eof() {
        let lifecycle = Lifecycle::new();
        let mut abandoned = task::spawn(lifecycle.abandoned());

        lifecycle.kill(Some(Error::StopAtEof));
        assert!(lifecycle.is_dying());
        assert_pending!(abandoned.poll());

        lifecycle.kill(Some(Error::killed("give up")));
        assert!(!lifecycle.stopping_at_eof());
        assert_ready!(abandoned.poll());
        match lifecycle.err() {
            Some(Error::Killed(reason)) => assert_eq!(reason, "give up"),
            other => panic!("Expected the replacing error, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_keeps_pending_stop_at_eof() {
        let lifecycle = Lifecycle::new();
        lifecycle.kill(Some(Error::StopAtEof));
        lifecycle.kill(None);
        lifecycle.done();

        assert!(lifecycle.stopping_at_eof());
        let mut abandoned = task::spawn(lifecycle.abandoned());
        assert_pending!(abandoned.poll());
    }

    #[test]
    fn test_plain_kill_abandons_immediately() {
        let lifecycle = Lifecycle::new();
        lifecycle.kill(None);

        let mut abandoned = task::spawn(lifecycle.abandoned());
        assert_ready!(abandoned.poll());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_done() {
        let lifecycle = Lifecycle::new();
        lifecycle.kill(Some(Error::killed("boom")));

        let mut wait = task::spawn(lifecycle.wait());
        assert_pending!(wait.poll());

        lifecycle.done();
        match assert_ready!(wait.poll()) {
            Err(Error::Killed(reason)) => assert_eq!(reason, "boom"),
            other => panic!("Expected killed error, got {:?}", other),
        }
        assert!(lifecycle.is_done());
    }

    #[tokio::test]
    async fn test_done_without_kill_is_clean() {
        let lifecycle = Lifecycle::new();
        let waiter = lifecycle.clone();

        let handle = tokio::spawn(async move { waiter.wait().await });
        lifecycle.done();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait should finish")
            .unwrap();
        assert!(result.is_ok());
        assert!(lifecycle.is_dying());
    }

    #[tokio::test]
    async fn test_stop_at_eof_waits_clean() {
        let lifecycle = Lifecycle::new();
        lifecycle.kill(Some(Error::StopAtEof));
        lifecycle.done();

        assert!(lifecycle.wait().await.is_ok());
    }
}
