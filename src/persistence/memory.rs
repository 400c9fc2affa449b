use super::{
    CHANGE_FEED_CAPACITY, Change, Document, DocumentStore, IndexOutcome, StoreError, StoreResult,
    next_revision, removal_tombstone, replicated_wins,
};
use crate::query::{IndexSpec, Selector};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;

#[derive(Default)]
struct MemoryState {
    docs: BTreeMap<String, Document>,
    seq_by_id: HashMap<String, u64>,
    id_by_seq: BTreeMap<u64, String>,
    seq: u64,
}

impl MemoryState {
    fn record(&mut self, doc: Document) -> Change {
        self.seq += 1;
        if let Some(previous) = self.seq_by_id.insert(doc.id.clone(), self.seq) {
            self.id_by_seq.remove(&previous);
        }
        self.id_by_seq.insert(self.seq, doc.id.clone());
        self.docs.insert(doc.id.clone(), doc.clone());
        Change { seq: self.seq, doc }
    }
}

struct Shared {
    state: RwLock<MemoryState>,
    changes: broadcast::Sender<Change>,
}

#[derive(Default)]
struct OpenCounter {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl OpenCounter {
    fn opened(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process document database.
///
/// Several handles can share one database (see [`MemoryStore::handle`]);
/// closing a handle only closes that handle.
pub struct MemoryStore {
    name: String,
    shared: Arc<Shared>,
    closed: AtomicBool,
    counter: Option<Arc<OpenCounter>>,
    /// Set on handles opened through a [`MemoryServer`]; shared with it.
    unreachable: Option<Arc<AtomicBool>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                state: RwLock::new(MemoryState::default()),
                changes,
            }),
            closed: AtomicBool::new(false),
            counter: None,
            unreachable: None,
        }
    }

    /// A new open handle onto the same data.
    pub fn handle(&self) -> Self {
        Self {
            name: self.name.clone(),
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
            counter: None,
            unreachable: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed(self.name.clone()));
        }
        if self
            .unreachable
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            return Err(StoreError::Transport(format!(
                "server unreachable for '{}'",
                self.name
            )));
        }
        Ok(())
    }

    fn publish(&self, change: Change) {
        // Nobody listening is fine.
        let _ = self.shared.changes.send(change);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Document>> {
        self.ensure_open()?;
        let state = self.shared.state.read();
        Ok(state.docs.get(id).filter(|doc| !doc.deleted).cloned())
    }

    async fn find(&self, selector: &Selector) -> StoreResult<Vec<Document>> {
        self.ensure_open()?;
        let state = self.shared.state.read();
        Ok(state
            .docs
            .values()
            .filter(|doc| selector.matches(doc))
            .cloned()
            .collect())
    }

    async fn put(&self, doc: Document) -> StoreResult<Document> {
        self.ensure_open()?;
        let change = {
            let mut state = self.shared.state.write();
            let rev = next_revision(state.docs.get(&doc.id), &doc)?;
            let stored = Document {
                rev: Some(rev),
                deleted: false,
                ..doc
            };
            state.record(stored)
        };
        let stored = change.doc.clone();
        self.publish(change);
        Ok(stored)
    }

    async fn remove(&self, doc: &Document) -> StoreResult<Document> {
        self.ensure_open()?;
        let change = {
            let mut state = self.shared.state.write();
            let tombstone = removal_tombstone(state.docs.get(&doc.id), doc)?;
            state.record(tombstone)
        };
        let tombstone = change.doc.clone();
        self.publish(change);
        Ok(tombstone)
    }

    async fn create_index(&self, index: &IndexSpec) -> StoreResult<IndexOutcome> {
        self.ensure_open()?;
        let change = {
            let mut state = self.shared.state.write();
            let existing = state.docs.get(&index.design_id());
            if existing.is_some_and(|doc| index.is_defined_by(doc)) {
                return Ok(IndexOutcome::Exists);
            }
            let design = Document {
                rev: existing.and_then(|doc| doc.rev.clone()),
                ..index.to_design_document()
            };
            let rev = next_revision(existing, &design)?;
            state.record(Document {
                rev: Some(rev),
                ..design
            })
        };
        self.publish(change);
        Ok(IndexOutcome::Created)
    }

    async fn changes_since(&self, since: u64) -> StoreResult<Vec<Change>> {
        self.ensure_open()?;
        let state = self.shared.state.read();
        Ok(state
            .id_by_seq
            .range(since + 1..)
            .filter_map(|(seq, id)| {
                state.docs.get(id).map(|doc| Change {
                    seq: *seq,
                    doc: doc.clone(),
                })
            })
            .collect())
    }

    async fn apply_replicated(&self, doc: Document) -> StoreResult<bool> {
        self.ensure_open()?;
        super::validate_id(&doc)?;
        let change = {
            let mut state = self.shared.state.write();
            if !replicated_wins(state.docs.get(&doc.id), &doc) {
                return Ok(false);
            }
            state.record(doc)
        };
        self.publish(change);
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.shared.changes.subscribe()
    }

    async fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(counter) = &self.counter {
                counter.closed();
            }
        }
        Ok(())
    }
}

/// A set of named in-process databases standing in for the remote server.
#[derive(Default)]
pub struct MemoryServer {
    databases: Mutex<HashMap<String, MemoryStore>>,
    unreachable: Arc<AtomicBool>,
    handles: Arc<OpenCounter>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the server. Handles already opened
    /// fail with [`StoreError::Transport`] while it is unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Opens a handle to `name`, creating the database on first use.
    pub fn open(&self, name: &str) -> StoreResult<Arc<MemoryStore>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Transport(format!(
                "server unreachable while opening '{name}'"
            )));
        }
        let mut databases = self.databases.lock();
        let root = databases
            .entry(name.to_string())
            .or_insert_with(|| MemoryStore::new(name));
        let mut handle = root.handle();
        handle.counter = Some(Arc::clone(&self.handles));
        handle.unreachable = Some(Arc::clone(&self.unreachable));
        self.handles.opened();
        Ok(Arc::new(handle))
    }

    /// Server-side view of a database, independent of client handles.
    pub fn database(&self, name: &str) -> Option<MemoryStore> {
        self.databases.lock().get(name).map(MemoryStore::handle)
    }

    pub fn open_handles(&self) -> usize {
        self.handles.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open handles seen so far.
    pub fn peak_open_handles(&self) -> usize {
        self.handles.peak.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_share_data_but_close_independently() {
        let server = MemoryServer::new();
        let first = server.open("userdb-61").unwrap();
        let second = server.open("userdb-61").unwrap();
        first.put(Document::new("a")).await.unwrap();
        assert!(second.get("a").await.unwrap().is_some());
        assert_eq!(server.open_handles(), 2);

        first.close().await.unwrap();
        first.close().await.unwrap();
        assert!(matches!(first.get("a").await, Err(StoreError::Closed(_))));
        assert!(second.get("a").await.unwrap().is_some());
        assert_eq!(server.open_handles(), 1);
        assert_eq!(server.peak_open_handles(), 2);
    }

    #[tokio::test]
    async fn change_feed_keeps_latest_revision_only() {
        let store = MemoryStore::new("local");
        let first = store.put(Document::new("a")).await.unwrap();
        store.put(Document::new("b")).await.unwrap();
        store.put(first).await.unwrap();
        let changes = store.changes_since(0).await.unwrap();
        let ids: Vec<&str> = changes.iter().map(|c| c.doc.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(store.changes_since(3).await.unwrap().is_empty());
    }

    #[test]
    fn unreachable_server_refuses_to_open() {
        let server = MemoryServer::new();
        server.set_reachable(false);
        assert!(matches!(server.open("x"), Err(StoreError::Transport(_))));
        assert_eq!(server.open_handles(), 0);
    }

    #[tokio::test]
    async fn open_handles_fail_while_server_is_unreachable() {
        let server = MemoryServer::new();
        let handle = server.open("userdb-61").unwrap();
        server.set_reachable(false);
        assert!(matches!(
            handle.changes_since(0).await,
            Err(StoreError::Transport(_))
        ));
        assert!(matches!(
            handle.apply_replicated(Document::new("a")).await,
            Err(StoreError::Transport(_))
        ));
        // the server side keeps working
        let view = server.database("userdb-61").unwrap();
        assert!(view.get("a").await.unwrap().is_none());

        server.set_reachable(true);
        assert!(handle.apply_replicated(Document::new("a")).await.unwrap());
    }
}
