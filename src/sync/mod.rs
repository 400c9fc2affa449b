//! Local/remote database lifecycle and the document query façade.

use crate::calendar::SeasonError;
use crate::persistence::{Document, DocumentStore, IndexOutcome, MemoryServer, StoreError, StoreResult};
use crate::query::{IndexSpec, Selector};
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

pub mod live;
pub mod replication;
pub mod status;

pub use live::LiveQuery;
pub use replication::RetryPolicy;
pub use status::{Direction, ReplicationEvent, SyncState, SyncStatus};

use replication::Replication;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no remote database is open and the session is remote-only")]
    NoActiveDatabase,
    #[error(transparent)]
    Season(#[from] SeasonError),
}

impl SyncError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Store(err) if err.is_conflict())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Opens handles to databases on the remote server.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn open(&self, database: &str) -> StoreResult<Arc<dyn DocumentStore>>;
}

#[async_trait]
impl RemoteConnector for MemoryServer {
    async fn open(&self, database: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        let handle: Arc<dyn DocumentStore> = MemoryServer::open(self, database)?;
        Ok(handle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOptions {
    /// Serve queries and writes from the remote handle instead of the local cache.
    pub remote_only: bool,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    NoRemote,
    RemoteActive { database: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Inputs {
    logged_in: bool,
    app_active: bool,
    network_connected: bool,
}

impl Inputs {
    fn remote_database_needed(&self) -> bool {
        self.app_active && self.network_connected && self.logged_in
    }
}

struct RemoteSlot {
    database: String,
    store: Arc<dyn DocumentStore>,
    replication: Replication,
}

/// Owns the local database and keeps a replicated remote open while the
/// session is logged in, in the foreground and online.
///
/// Input changes are handled one at a time through `&mut self`; a remote is
/// always fully torn down (replication cancelled, handle closed) before the
/// next one is opened.
pub struct SyncController {
    local: Arc<dyn DocumentStore>,
    connector: Arc<dyn RemoteConnector>,
    options: SyncOptions,
    database: String,
    inputs: Inputs,
    remote: Option<RemoteSlot>,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl SyncController {
    pub fn new(
        local: Arc<dyn DocumentStore>,
        connector: Arc<dyn RemoteConnector>,
        database: impl Into<String>,
        options: SyncOptions,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            local,
            connector,
            options,
            database: database.into(),
            inputs: Inputs::default(),
            remote: None,
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ControllerState {
        match &self.remote {
            Some(slot) => ControllerState::RemoteActive {
                database: slot.database.clone(),
            },
            None => ControllerState::NoRemote,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn remote_database_needed(&self) -> bool {
        self.inputs.remote_database_needed()
    }

    pub async fn set_logged_in(&mut self, logged_in: bool) {
        self.inputs.logged_in = logged_in;
        self.reconcile().await;
    }

    pub async fn set_app_active(&mut self, app_active: bool) {
        self.inputs.app_active = app_active;
        self.reconcile().await;
    }

    pub async fn set_network_connected(&mut self, network_connected: bool) {
        self.inputs.network_connected = network_connected;
        self.reconcile().await;
    }

    pub async fn set_database(&mut self, database: impl Into<String>) {
        self.database = database.into();
        self.reconcile().await;
    }

    async fn reconcile(&mut self) {
        let needed = self.inputs.remote_database_needed();
        let stale = self
            .remote
            .as_ref()
            .is_some_and(|slot| !needed || slot.database != self.database);
        if stale {
            self.close_remote().await;
        }
        if needed && self.remote.is_none() {
            self.open_remote().await;
        }
    }

    async fn open_remote(&mut self) {
        let database = self.database.clone();
        match self.connector.open(&database).await {
            Ok(store) => {
                info!(%database, "remote database opened");
                let replication = Replication::start(
                    Arc::clone(&self.local),
                    Arc::clone(&store),
                    self.options.retry,
                    Arc::clone(&self.status),
                );
                self.remote = Some(RemoteSlot {
                    database,
                    store,
                    replication,
                });
            }
            Err(err) => {
                // Stays without a remote until the next input change.
                warn!(%database, error = %err, "failed to open remote database");
            }
        }
    }

    async fn close_remote(&mut self) {
        let Some(slot) = self.remote.take() else {
            return;
        };
        info!(database = %slot.database, "closing remote database");
        slot.replication.cancel().await;
        if let Err(err) = slot.store.close().await {
            warn!(database = %slot.database, error = %err, "failed to close remote database");
        }
    }

    /// Ends the session: stops replication and closes both databases.
    pub async fn shutdown(mut self) -> SyncResult<()> {
        self.close_remote().await;
        self.local.close().await?;
        info!(database = %self.database, "local database closed");
        Ok(())
    }

    /// The handle queries and writes go to: the local cache, or the open
    /// remote when `remote_only` is set.
    pub fn active_store(&self) -> SyncResult<Arc<dyn DocumentStore>> {
        if !self.options.remote_only {
            return Ok(Arc::clone(&self.local));
        }
        self.remote
            .as_ref()
            .map(|slot| Arc::clone(&slot.store))
            .ok_or(SyncError::NoActiveDatabase)
    }

    /// Live collection of mapped documents keyed by `indexer`. Documents the
    /// mapper rejects are left out.
    pub async fn find_all<T, K, M, I>(
        &self,
        selector: Selector,
        mapper: M,
        indexer: I,
    ) -> SyncResult<LiveQuery<HashMap<K, T>>>
    where
        T: Send + Sync + 'static,
        K: Eq + Hash + Send + Sync + 'static,
        M: Fn(Document) -> Option<T> + Send + 'static,
        I: Fn(&T) -> K + Send + 'static,
    {
        let store = self.active_store()?;
        let live = LiveQuery::start(store, selector, move |docs| {
            docs.into_iter()
                .filter_map(&mapper)
                .map(|item| (indexer(&item), item))
                .collect()
        })
        .await?;
        Ok(live)
    }

    pub async fn find_all_documents(
        &self,
        selector: Selector,
    ) -> SyncResult<LiveQuery<HashMap<String, Document>>> {
        self.find_all(selector, Some, |doc: &Document| doc.id.clone())
            .await
    }

    /// Live single result: the first mapped match by id, or `default()`.
    pub async fn find_one<T, M, D>(
        &self,
        selector: Selector,
        mapper: M,
        default: D,
    ) -> SyncResult<LiveQuery<T>>
    where
        T: Send + Sync + 'static,
        M: Fn(Document) -> Option<T> + Send + 'static,
        D: Fn() -> T + Send + 'static,
    {
        let store = self.active_store()?;
        let live = LiveQuery::start(store, selector, move |docs| {
            docs.into_iter()
                .find_map(&mapper)
                .unwrap_or_else(&default)
        })
        .await?;
        Ok(live)
    }

    pub async fn get(&self, id: &str) -> SyncResult<LiveQuery<Option<Document>>> {
        self.find_one(Selector::by_id(id), |doc| Some(Some(doc)), || None)
            .await
    }

    pub async fn put(&self, doc: Document) -> SyncResult<Document> {
        Ok(self.active_store()?.put(doc).await?)
    }

    pub async fn remove(&self, doc: &Document) -> SyncResult<Document> {
        Ok(self.active_store()?.remove(doc).await?)
    }

    pub async fn create_index(&self, index: &IndexSpec) -> SyncResult<IndexOutcome> {
        Ok(self.active_store()?.create_index(index).await?)
    }
}
