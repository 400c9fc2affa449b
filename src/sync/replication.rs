//! Continuous, live, retrying replication between two document stores.

use super::status::{Direction, ReplicationEvent, SyncStatus};
use crate::persistence::{Change, Document, DocumentStore, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backoff between attempts after a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

#[derive(Debug, Default)]
struct Checkpoint {
    push: u64,
    pull: u64,
}

/// A running replication job. Dropping it without [`Replication::cancel`]
/// stops the job without waiting for it to finish.
pub(crate) struct Replication {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Replication {
    pub(crate) fn start(
        local: Arc<dyn DocumentStore>,
        remote: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
        status: Arc<watch::Sender<SyncStatus>>,
    ) -> Self {
        let (cancel, cancelled) = watch::channel(false);
        info!(local = local.name(), remote = remote.name(), "starting replication");
        let task = tokio::spawn(run(local, remote, retry, status, cancelled));
        Self { cancel, task }
    }

    /// Stops replication and waits until the job has fully finished.
    pub(crate) async fn cancel(self) {
        let _ = self.cancel.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "replication task ended abnormally");
        }
    }
}

fn emit(status: &watch::Sender<SyncStatus>, event: ReplicationEvent) {
    debug!(?event, "replication event");
    status.send_replace(SyncStatus::from(&event));
}

fn drain(feed: &mut broadcast::Receiver<Change>) {
    while feed.try_recv().is_ok() {}
}

async fn run(
    local: Arc<dyn DocumentStore>,
    remote: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    status: Arc<watch::Sender<SyncStatus>>,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut local_feed = local.subscribe();
    let mut remote_feed = remote.subscribe();
    let mut checkpoint = Checkpoint::default();
    let mut delay = retry.initial;

    while !*cancelled.borrow() {
        // Events queued so far are covered by the cycle below.
        drain(&mut local_feed);
        drain(&mut remote_feed);
        emit(&status, ReplicationEvent::Active);

        let outcome = tokio::select! {
            _ = cancelled.changed() => break,
            outcome = replicate_once(local.as_ref(), remote.as_ref(), &mut checkpoint, &status) => outcome,
        };

        let stop = match outcome {
            Ok(()) => {
                delay = retry.initial;
                emit(&status, ReplicationEvent::Paused(None));
                tokio::select! {
                    _ = cancelled.changed() => true,
                    _ = local_feed.recv() => false,
                    _ = remote_feed.recv() => false,
                }
            }
            Err(err) => {
                warn!(error = %err, retry_in = ?delay, remote = remote.name(), "replication failed");
                emit(&status, ReplicationEvent::Paused(Some(err.to_string())));
                let wait = delay;
                delay = retry.next(delay);
                tokio::select! {
                    _ = cancelled.changed() => true,
                    _ = tokio::time::sleep(wait) => false,
                }
            }
        };
        if stop {
            break;
        }
    }

    emit(&status, ReplicationEvent::Complete);
    info!(local = local.name(), remote = remote.name(), "replication stopped");
}

async fn replicate_once(
    local: &dyn DocumentStore,
    remote: &dyn DocumentStore,
    checkpoint: &mut Checkpoint,
    status: &watch::Sender<SyncStatus>,
) -> StoreResult<()> {
    // Index definitions stay local.
    let pushed = transfer(local, remote, &mut checkpoint.push, |doc| !doc.is_design()).await?;
    if pushed > 0 {
        emit(
            status,
            ReplicationEvent::Change {
                direction: Direction::Push,
                docs_written: pushed,
            },
        );
    }
    let pulled = transfer(remote, local, &mut checkpoint.pull, |_| true).await?;
    if pulled > 0 {
        emit(
            status,
            ReplicationEvent::Change {
                direction: Direction::Pull,
                docs_written: pulled,
            },
        );
    }
    Ok(())
}

async fn transfer(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    since: &mut u64,
    filter: fn(&Document) -> bool,
) -> StoreResult<usize> {
    let mut written = 0;
    for change in source.changes_since(*since).await? {
        if filter(&change.doc) && target.apply_replicated(change.doc).await? {
            written += 1;
        }
        *since = change.seq;
    }
    Ok(written)
}
