use crate::query::{IndexSpec, Selector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Prefix of documents that describe query indexes rather than user data.
pub const DESIGN_PREFIX: &str = "_design/";

pub(crate) const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document update conflict on '{id}'")]
    Conflict { id: String },
    #[error("document '{0}' not found")]
    NotFound(String),
    #[error("database '{0}' is closed")]
    Closed(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A JSON document with its identity and revision pulled out of the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "_deleted", default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            deleted: false,
            body: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    pub fn is_design(&self) -> bool {
        self.id.starts_with(DESIGN_PREFIX)
    }

    fn tombstone(&self, rev: String) -> Self {
        Self {
            id: self.id.clone(),
            rev: Some(rev),
            deleted: true,
            body: Map::new(),
        }
    }
}

/// One entry of a store's change feed: the latest state of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub seq: u64,
    pub doc: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Created,
    Exists,
}

/// Capabilities the sync layer needs from a document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, id: &str) -> StoreResult<Option<Document>>;

    /// Live documents matching `selector`, ordered by id.
    async fn find(&self, selector: &Selector) -> StoreResult<Vec<Document>>;

    /// Stores `doc` and returns it with its new revision.
    async fn put(&self, doc: Document) -> StoreResult<Document>;

    /// Replaces the current revision of `doc` with a tombstone.
    async fn remove(&self, doc: &Document) -> StoreResult<Document>;

    async fn create_index(&self, index: &IndexSpec) -> StoreResult<IndexOutcome>;

    async fn changes_since(&self, since: u64) -> StoreResult<Vec<Change>>;

    /// Write path for replication: keeps the incoming revision and resolves
    /// competing revisions deterministically. Returns whether anything changed.
    async fn apply_replicated(&self, doc: Document) -> StoreResult<bool>;

    fn subscribe(&self) -> broadcast::Receiver<Change>;

    async fn close(&self) -> StoreResult<()>;
}

pub(crate) fn revision_generation(rev: Option<&str>) -> u64 {
    rev.and_then(|rev| rev.split_once('-'))
        .and_then(|(generation, _)| generation.parse().ok())
        .unwrap_or(0)
}

fn new_revision(generation: u64) -> String {
    format!("{generation}-{}", Uuid::new_v4().simple())
}

pub(crate) fn validate_id(doc: &Document) -> StoreResult<()> {
    if doc.id.trim().is_empty() {
        return Err(StoreError::InvalidDocument("document id must not be empty".into()));
    }
    Ok(())
}

/// Revision for a `put` of `incoming` over `current`.
pub(crate) fn next_revision(current: Option<&Document>, incoming: &Document) -> StoreResult<String> {
    validate_id(incoming)?;
    match current {
        None if incoming.rev.is_some() => Err(StoreError::NotFound(incoming.id.clone())),
        None => Ok(new_revision(1)),
        Some(existing) if existing.deleted => {
            if incoming.rev.is_some() && incoming.rev != existing.rev {
                return Err(StoreError::Conflict {
                    id: incoming.id.clone(),
                });
            }
            Ok(new_revision(revision_generation(existing.rev.as_deref()) + 1))
        }
        Some(existing) => {
            if incoming.rev != existing.rev {
                return Err(StoreError::Conflict {
                    id: incoming.id.clone(),
                });
            }
            Ok(new_revision(revision_generation(existing.rev.as_deref()) + 1))
        }
    }
}

/// Tombstone replacing `current` when `target` is removed.
pub(crate) fn removal_tombstone(current: Option<&Document>, target: &Document) -> StoreResult<Document> {
    let existing = match current {
        Some(existing) if !existing.deleted => existing,
        _ => return Err(StoreError::NotFound(target.id.clone())),
    };
    if target.rev != existing.rev {
        return Err(StoreError::Conflict {
            id: target.id.clone(),
        });
    }
    let generation = revision_generation(existing.rev.as_deref()) + 1;
    Ok(existing.tombstone(new_revision(generation)))
}

/// Whether a replicated revision replaces the stored one.
pub(crate) fn replicated_wins(current: Option<&Document>, incoming: &Document) -> bool {
    let Some(existing) = current else {
        return true;
    };
    let ours = (
        revision_generation(existing.rev.as_deref()),
        existing.rev.as_deref().unwrap_or_default(),
    );
    let theirs = (
        revision_generation(incoming.rev.as_deref()),
        incoming.rev.as_deref().unwrap_or_default(),
    );
    theirs > ours
}

pub mod file;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::{load_season_from_json, save_weeks_to_csv};
pub use memory::{MemoryServer, MemoryStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_requires_current_revision() {
        let stored = Document {
            rev: Some("2-abc".into()),
            ..Document::new("member:1")
        };
        let stale = Document {
            rev: Some("1-xyz".into()),
            ..Document::new("member:1")
        };
        assert!(next_revision(Some(&stored), &stale).unwrap_err().is_conflict());
        assert!(next_revision(Some(&stored), &Document::new("member:1")).is_err());

        let fresh = Document {
            rev: Some("2-abc".into()),
            ..Document::new("member:1")
        };
        let rev = next_revision(Some(&stored), &fresh).unwrap();
        assert_eq!(revision_generation(Some(&rev)), 3);
    }

    #[test]
    fn replication_prefers_higher_generation_then_larger_rev() {
        let current = Document {
            rev: Some("2-aaa".into()),
            ..Document::new("a")
        };
        let older = Document {
            rev: Some("1-zzz".into()),
            ..Document::new("a")
        };
        let sibling = Document {
            rev: Some("2-bbb".into()),
            ..Document::new("a")
        };
        assert!(!replicated_wins(Some(&current), &older));
        assert!(replicated_wins(Some(&current), &sibling));
        assert!(!replicated_wins(Some(&current), &current.clone()));
    }

    #[test]
    fn document_flattens_body_fields() {
        let doc = Document::new("season:1").with_field("type", "season");
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json, serde_json::json!({ "_id": "season:1", "type": "season" }));
    }
}
