use super::{
    CHANGE_FEED_CAPACITY, Change, Document, DocumentStore, IndexOutcome, StoreError, StoreResult,
    next_revision, removal_tombstone, replicated_wins,
};
use crate::query::{IndexSpec, Selector};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use serde_json::{Map, Value};
use std::path::Path;
use tokio::sync::broadcast;

/// Persistent local cache backed by a single SQLite file.
pub struct SqliteStore {
    name: String,
    connection: Mutex<Option<Connection>>,
    changes: broadcast::Sender<Change>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(name: impl Into<String>, path: P) -> StoreResult<Self> {
        let connection = Connection::open(path)?;
        Self::initialize_schema(&connection)?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            name: name.into(),
            connection: Mutex::new(Some(connection)),
            changes,
        })
    }

    fn initialize_schema(connection: &Connection) -> StoreResult<()> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                rev TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL,
                seq INTEGER NOT NULL UNIQUE
            );
        "#;
        connection.execute_batch(ddl)?;
        Ok(())
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.connection.lock();
        let connection = guard
            .as_mut()
            .ok_or_else(|| StoreError::Closed(self.name.clone()))?;
        f(connection)
    }

    fn publish(&self, change: Change) {
        let _ = self.changes.send(change);
    }

    fn read_document(row: &Row<'_>) -> rusqlite::Result<(String, String, bool, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode((id, rev, deleted, body): (String, String, bool, String)) -> StoreResult<Document> {
        let body: Map<String, Value> = serde_json::from_str(&body)?;
        Ok(Document {
            id,
            rev: Some(rev),
            deleted,
            body,
        })
    }

    fn load(tx: &Transaction<'_>, id: &str) -> StoreResult<Option<Document>> {
        let raw = tx
            .query_row(
                "SELECT id, rev, deleted, body FROM documents WHERE id = ?1",
                params![id],
                Self::read_document,
            )
            .optional()?;
        raw.map(Self::decode).transpose()
    }

    fn write(tx: &Transaction<'_>, doc: Document) -> StoreResult<Change> {
        let seq: i64 = tx.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM documents", [], |row| {
            row.get(0)
        })?;
        let body = serde_json::to_string(&doc.body)?;
        tx.execute(
            "INSERT INTO documents (id, rev, deleted, body, seq) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET rev = excluded.rev, deleted = excluded.deleted,
                 body = excluded.body, seq = excluded.seq",
            params![doc.id, doc.rev.as_deref().unwrap_or_default(), doc.deleted, body, seq],
        )?;
        Ok(Change {
            seq: seq as u64,
            doc,
        })
    }

    /// `find` statement with the selector's scalar equalities pushed into the
    /// `WHERE` clause, in the same `json_extract` form the indexes use.
    /// Rows it returns still have to pass `Selector::matches`.
    fn find_query(selector: &Selector) -> (String, Vec<SqlValue>) {
        let mut sql = String::from(
            "SELECT id, rev, deleted, body FROM documents
             WHERE deleted = 0 AND substr(id, 1, 8) != '_design/'",
        );
        let mut values = Vec::new();
        for (field, expected) in selector.equalities() {
            if !is_index_field(field) {
                continue;
            }
            let value = match expected {
                Value::String(text) => SqlValue::Text(text.clone()),
                Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
                Value::Number(number) => match number.as_i64() {
                    Some(int) => SqlValue::Integer(int),
                    None if number.is_f64() => match number.as_f64() {
                        Some(real) => SqlValue::Real(real),
                        None => continue,
                    },
                    None => continue,
                },
                _ => continue,
            };
            values.push(value);
            sql.push_str(&format!(
                " AND json_extract(body, '$.{field}') = ?{}",
                values.len()
            ));
        }
        sql.push_str(" ORDER BY id ASC");
        (sql, values)
    }

    /// SQL expression index over the JSON fields of `index`.
    fn create_sql_index(tx: &Transaction<'_>, index: &IndexSpec) -> StoreResult<()> {
        if index.fields.is_empty() || !index.fields.iter().all(|f| is_index_field(f)) {
            return Err(StoreError::InvalidDocument(format!(
                "unsupported index fields {:?}",
                index.fields
            )));
        }
        let sql_name: String = index
            .index_name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let columns = index
            .fields
            .iter()
            .map(|field| format!("json_extract(body, '$.{field}')"))
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"doc_{sql_name}\" ON documents ({columns});"
        ))?;
        Ok(())
    }
}

fn is_index_field(field: &str) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Document>> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let doc = Self::load(&tx, id)?;
            Ok(doc.filter(|doc| !doc.deleted))
        })
    }

    async fn find(&self, selector: &Selector) -> StoreResult<Vec<Document>> {
        let (sql, values) = Self::find_query(selector);
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), Self::read_document)?;
            let mut docs = Vec::new();
            for raw in rows {
                let doc = Self::decode(raw?)?;
                if selector.matches(&doc) {
                    docs.push(doc);
                }
            }
            Ok(docs)
        })
    }

    async fn put(&self, doc: Document) -> StoreResult<Document> {
        let change = self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let current = Self::load(&tx, &doc.id)?;
            let rev = next_revision(current.as_ref(), &doc)?;
            let change = Self::write(
                &tx,
                Document {
                    rev: Some(rev),
                    deleted: false,
                    ..doc
                },
            )?;
            tx.commit()?;
            Ok(change)
        })?;
        let stored = change.doc.clone();
        self.publish(change);
        Ok(stored)
    }

    async fn remove(&self, doc: &Document) -> StoreResult<Document> {
        let change = self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let current = Self::load(&tx, &doc.id)?;
            let tombstone = removal_tombstone(current.as_ref(), doc)?;
            let change = Self::write(&tx, tombstone)?;
            tx.commit()?;
            Ok(change)
        })?;
        let tombstone = change.doc.clone();
        self.publish(change);
        Ok(tombstone)
    }

    async fn create_index(&self, index: &IndexSpec) -> StoreResult<IndexOutcome> {
        let change = self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let current = Self::load(&tx, &index.design_id())?;
            if current.as_ref().is_some_and(|doc| index.is_defined_by(doc)) {
                return Ok(None);
            }
            Self::create_sql_index(&tx, index)?;
            let design = Document {
                rev: current.as_ref().and_then(|doc| doc.rev.clone()),
                ..index.to_design_document()
            };
            let rev = next_revision(current.as_ref(), &design)?;
            let change = Self::write(
                &tx,
                Document {
                    rev: Some(rev),
                    ..design
                },
            )?;
            tx.commit()?;
            Ok(Some(change))
        })?;
        match change {
            Some(change) => {
                self.publish(change);
                Ok(IndexOutcome::Created)
            }
            None => Ok(IndexOutcome::Exists),
        }
    }

    async fn changes_since(&self, since: u64) -> StoreResult<Vec<Change>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, rev, deleted, body, seq FROM documents WHERE seq > ?1 ORDER BY seq ASC",
            )?;
            let since = i64::try_from(since).unwrap_or(i64::MAX);
            let rows = stmt.query_map(params![since], |row| {
                Ok((Self::read_document(row)?, row.get::<_, i64>(4)?))
            })?;
            let mut changes = Vec::new();
            for row in rows {
                let (raw, seq) = row?;
                changes.push(Change {
                    seq: seq as u64,
                    doc: Self::decode(raw)?,
                });
            }
            Ok(changes)
        })
    }

    async fn apply_replicated(&self, doc: Document) -> StoreResult<bool> {
        super::validate_id(&doc)?;
        let change = self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let current = Self::load(&tx, &doc.id)?;
            if !replicated_wins(current.as_ref(), &doc) {
                return Ok(None);
            }
            let change = Self::write(&tx, doc)?;
            tx.commit()?;
            Ok(Some(change))
        })?;
        Ok(match change {
            Some(change) => {
                self.publish(change);
                true
            }
            None => false,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    async fn close(&self) -> StoreResult<()> {
        if let Some(connection) = self.connection.lock().take() {
            connection
                .close()
                .map_err(|(_, err)| StoreError::Sqlite(err))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn type_selector_searches_the_type_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open("local", dir.path().join("local.sqlite3")).unwrap();
        store
            .create_index(&IndexSpec::new(["type"]).named("by-type"))
            .await
            .unwrap();

        let (sql, values) = SqliteStore::find_query(&Selector::by_type("member"));
        assert_eq!(values, vec![SqlValue::Text("member".into())]);
        let plan = store
            .with_connection(|conn| {
                let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}"))?;
                let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                    row.get::<_, String>(3)
                })?;
                let plan = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(plan)
            })
            .unwrap();
        assert!(
            plan.iter().any(|line| line.contains("doc_by_type")),
            "plan: {plan:?}"
        );
    }

    #[test]
    fn only_scalar_equalities_reach_sql() {
        let selector = Selector::by_type("member")
            .and("shares", serde_json::json!({ "$gt": 1 }))
            .and("active", true);
        let (sql, values) = SqliteStore::find_query(&selector);
        assert_eq!(values.len(), 2);
        assert!(sql.contains("json_extract(body, '$.active') = ?"));
        assert!(sql.contains("json_extract(body, '$.type') = ?"));
        assert!(values.contains(&SqlValue::Integer(1)));
        assert!(!sql.contains("shares"));
    }
}
