use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::info;

use crate::cancel::Cancel;
use crate::error::{SinkError, StoreError};
use crate::models::TransferRecord;
use crate::parser::document_id;

/// Collection the transfer documents live in.
pub const TRANSFER_COLLECTION: &str = "alchemy_stream";

/// Largest number of writes committed in one transaction.
pub const MAX_GROUP_SIZE: usize = 500;

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL,
  id         TEXT NOT NULL,
  body       TEXT NOT NULL, -- TransferRecord as JSON
  PRIMARY KEY (collection, id)
);
"#;

/// Writes staged inside one transaction.
pub trait Staging {
    /// Upsert `doc` under `id`, replacing any existing document.
    fn set(&mut self, id: &str, doc: &TransferRecord) -> Result<(), StoreError>;
}

/// A document store with all-or-nothing transactions.
///
/// `body` stages writes; they are committed only if it returns `Ok`.
pub trait DocumentStore: Send + Sync {
    fn run_transaction(
        &self,
        collection: &str,
        body: &mut dyn FnMut(&mut dyn Staging) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

// ---------- SQLite ----------

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database file (WAL mode) and run migrations.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    // A panic mid-transaction drops the uncommitted transaction, which rolls it
    // back, so the connection behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(INIT_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<TransferRecord>, StoreError> {
        let conn = self.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(body
            .map(|b| serde_json::from_str::<TransferRecord>(&b))
            .transpose()?)
    }

    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let conn = self.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [collection],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

struct SqliteStaging<'a, 'conn> {
    tx: &'a Transaction<'conn>,
    collection: &'a str,
}

impl Staging for SqliteStaging<'_, '_> {
    fn set(&mut self, id: &str, doc: &TransferRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc)?;
        self.tx
            .prepare_cached(
                r#"
                INSERT INTO documents (collection, id, body)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(collection, id) DO UPDATE SET
                    body = excluded.body
                "#,
            )?
            .execute(params![self.collection, id, body])?;
        Ok(())
    }
}

impl DocumentStore for SqliteStore {
    fn run_transaction(
        &self,
        collection: &str,
        body: &mut dyn FnMut(&mut dyn Staging) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        body(&mut SqliteStaging {
            tx: &tx,
            collection,
        })?;
        // dropping an uncommitted transaction rolls it back
        tx.commit()?;
        Ok(())
    }
}

// ---------- Writer ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteSummary {
    pub groups: usize,
    pub documents: usize,
}

/// Persists transfers in groups of at most [`MAX_GROUP_SIZE`], one
/// transaction per group, keyed by [`document_id`].
#[derive(Clone)]
pub struct TransferWriter {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl TransferWriter {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Groups commit in order; the first failure stops the write and earlier
    /// groups stay committed. Nothing is retried.
    pub async fn write_batch(
        &self,
        transfers: &[TransferRecord],
        cancel: &Cancel,
    ) -> Result<WriteSummary, SinkError> {
        let mut summary = WriteSummary::default();

        for (group, chunk) in transfers.chunks(MAX_GROUP_SIZE).enumerate() {
            if cancel.is_cancelled() {
                return Err(SinkError::Cancelled);
            }

            let start = group * MAX_GROUP_SIZE;
            let end = start + chunk.len();

            let store = Arc::clone(&self.store);
            let collection = self.collection.clone();
            let docs = chunk.to_vec();
            let cancel_inner = cancel.clone();

            let result = tokio::task::spawn_blocking(move || {
                store.run_transaction(&collection, &mut |staging: &mut dyn Staging| {
                    for doc in &docs {
                        let id = document_id(&doc.transaction.hash, doc.transfer.log_index);
                        staging.set(&id, doc)?;
                    }
                    if cancel_inner.is_cancelled() {
                        return Err(StoreError::Aborted);
                    }
                    Ok(())
                })
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    summary.groups += 1;
                    summary.documents += chunk.len();
                    info!(
                        collection = %self.collection,
                        batch_range = %format!("{start}-{end}"),
                        batch_size = chunk.len(),
                        "batch written to store"
                    );
                }
                Ok(Err(StoreError::Aborted)) => return Err(SinkError::Cancelled),
                Ok(Err(source)) => {
                    return Err(SinkError::Persistence {
                        group,
                        committed: summary.groups,
                        source,
                    })
                }
                Err(join) => {
                    return Err(SinkError::Persistence {
                        group,
                        committed: summary.groups,
                        source: StoreError::Task(join.to_string()),
                    })
                }
            }
        }

        info!(
            collection = %self.collection,
            total_count = summary.documents,
            groups = summary.groups,
            "all batches written to store"
        );
        Ok(summary)
    }
}
