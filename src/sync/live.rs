use crate::persistence::{Document, DocumentStore, StoreError, StoreResult};
use crate::query::Selector;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// Snapshots of a query, refreshed whenever a relevant document changes.
///
/// The first snapshot is available as soon as the query is returned.
/// Delivery stops on [`LiveQuery::cancel`] or when the value is dropped.
pub struct LiveQuery<T> {
    receiver: watch::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> LiveQuery<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) async fn start<F>(
        store: Arc<dyn DocumentStore>,
        selector: Selector,
        evaluate: F,
    ) -> StoreResult<Self>
    where
        F: Fn(Vec<Document>) -> T + Send + 'static,
    {
        // Subscribe first so nothing written after the initial read is missed.
        let mut feed = store.subscribe();
        let docs = store.find(&selector).await?;
        let mut tracked: HashSet<String> = docs.iter().map(|doc| doc.id.clone()).collect();
        let (sender, receiver) = watch::channel(evaluate(docs));

        let task = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(change) => {
                        if !selector.matches(&change.doc) && !tracked.contains(&change.doc.id) {
                            continue;
                        }
                    }
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                match store.find(&selector).await {
                    Ok(docs) => {
                        tracked = docs.iter().map(|doc| doc.id.clone()).collect();
                        if sender.send(evaluate(docs)).is_err() {
                            break;
                        }
                    }
                    Err(StoreError::Closed(name)) => {
                        warn!(database = %name, "live query stopped: database closed");
                        break;
                    }
                    Err(err) => warn!(error = %err, "live query refresh failed"),
                }
            }
        });

        Ok(Self { receiver, task })
    }

    pub fn borrow(&self) -> watch::Ref<'_, T> {
        self.receiver.borrow()
    }

    /// Waits for the next snapshot. Returns `false` once no more will come.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl<T: Clone> LiveQuery<T> {
    pub fn current(&self) -> T {
        self.receiver.borrow().clone()
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
