//! Structured-record store sink.
//!
//! Events are normalized into [`StoredLogRecord`]s and handed to a
//! [`RecordStore`]. The query layer over stored records lives elsewhere;
//! this module only writes records and reads them back by id or recency.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callstack::CallStack;
use crate::error::LogResult;
use crate::event::{Context, LogEvent};
use crate::level::Severity;

const LOG_RECORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("log_records");

/// A record ready to be persisted. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLogRecord {
    pub process_identity: String,
    pub category: String,
    pub level: u8,
    pub message: String,
    pub context: Option<Context>,
    pub call_stack: Option<CallStack>,
}

impl NewLogRecord {
    /// Normalize an event. `debugStack.trace` is dropped from the context
    /// since the full trace is already kept in `call_stack`.
    pub fn from_event(event: &LogEvent) -> Self {
        Self {
            process_identity: event.process_identity.clone(),
            category: event.category.clone(),
            level: event.severity.as_number(),
            message: event.message.clone(),
            context: event.context.as_ref().map(strip_debug_trace),
            call_stack: event.call_stack.clone(),
        }
    }
}

/// A persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLogRecord {
    pub id: u64,
    pub process_identity: String,
    pub category: String,
    pub level: u8,
    pub message: String,
    pub context: Option<Context>,
    pub call_stack: Option<CallStack>,
    /// Persistence time, not event time
    pub created_at: DateTime<Utc>,
}

impl StoredLogRecord {
    pub fn severity(&self) -> LogResult<Severity> {
        Severity::from_number(self.level)
    }
}

fn strip_debug_trace(context: &Context) -> Context {
    let mut context = context.clone();
    if let Some(Value::Object(debug_stack)) = context.get_mut("debugStack") {
        debug_stack.remove("trace");
    }
    context
}

/// Data-access layer the store sink writes through.
///
/// Calls are blocking; the router runs them on the blocking pool.
pub trait RecordStore: Send + Sync + 'static {
    /// Persist a record and return its assigned id.
    fn save(&self, record: NewLogRecord) -> LogResult<u64>;

    fn get(&self, id: u64) -> LogResult<Option<StoredLogRecord>>;

    /// Up to `limit` records, newest first.
    fn recent(&self, limit: usize) -> LogResult<Vec<StoredLogRecord>>;
}

/// [`RecordStore`] backed by a redb file. Ids are assigned inside the write
/// transaction, so they are strictly increasing.
#[derive(Clone)]
pub struct RedbRecordStore {
    db: Arc<Database>,
}

impl RedbRecordStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LOG_RECORDS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl RecordStore for RedbRecordStore {
    fn save(&self, record: NewLogRecord) -> LogResult<u64> {
        let write_txn = self.db.begin_write()?;
        let id = {
            let mut table = write_txn.open_table(LOG_RECORDS_TABLE)?;
            let id = table.last()?.map(|(key, _)| key.value() + 1).unwrap_or(1);

            let stored = StoredLogRecord {
                id,
                process_identity: record.process_identity,
                category: record.category,
                level: record.level,
                message: record.message,
                context: record.context,
                call_stack: record.call_stack,
                created_at: Utc::now(),
            };
            let data = serde_json::to_vec(&stored)?;
            table.insert(id, data.as_slice())?;
            id
        };
        write_txn.commit()?;
        Ok(id)
    }

    fn get(&self, id: u64) -> LogResult<Option<StoredLogRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOG_RECORDS_TABLE)?;

        match table.get(id)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn recent(&self, limit: usize) -> LogResult<Vec<StoredLogRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOG_RECORDS_TABLE)?;

        let mut records = Vec::new();
        for entry in table.iter()?.rev().take(limit) {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }
}

/// Sink that persists events through a [`RecordStore`].
#[derive(Clone)]
pub struct StoreSink {
    store: Arc<dyn RecordStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Persist the event. Blocking; never retried.
    pub fn persist(&self, event: &LogEvent) -> LogResult<u64> {
        self.store.save(NewLogRecord::from_event(event))
    }
}
