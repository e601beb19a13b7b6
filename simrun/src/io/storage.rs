//! Storage synchronisation at phase boundaries.
//!
//! The orchestrator never reads or writes simulation output itself. It only
//! tells the storage engine when to forget prior write tracking, when to stop
//! its writer, and when to refresh the view readers see. Without a storage
//! engine every call is a no-op.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Contract consumed from the storage/query engine.
pub trait Storage: Send + Sync {
    /// Forget which tables were written by earlier runs.
    fn clear_write_tracking(&self);

    /// Block until no writes are pending.
    fn wait_until_idle(&self);

    /// Make everything written so far visible to readers.
    fn refresh_readable_view(&self);

    /// Flush and stop the writer. A later write restarts it.
    fn stop_accepting_writes(&self);
}

/// Shared storage handle; this is the type tools and tests depend on.
#[derive(Clone)]
pub struct StorageHandle(Arc<dyn Storage>);

impl StorageHandle {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self(storage)
    }
}

impl Deref for StorageHandle {
    type Target = dyn Storage;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorageHandle")
    }
}

/// Phase-boundary calls into an optional storage engine.
#[derive(Debug, Clone, Default)]
pub struct StorageSyncPoint {
    storage: Option<StorageHandle>,
}

impl StorageSyncPoint {
    pub fn new(storage: Option<StorageHandle>) -> Self {
        Self { storage }
    }

    pub fn handle(&self) -> Option<&StorageHandle> {
        self.storage.as_ref()
    }

    /// Called before any job runs.
    pub fn begin_run(&self) {
        if let Some(storage) = &self.storage {
            debug!("clearing storage write tracking");
            storage.clear_write_tracking();
        }
    }

    /// Stop the writer, wait for it to drain, and refresh the readable view.
    /// Safe to call repeatedly.
    #[instrument(skip_all)]
    pub fn flush(&self) {
        if let Some(storage) = &self.storage {
            storage.stop_accepting_writes();
            storage.wait_until_idle();
            storage.refresh_readable_view();
            debug!("storage flushed");
        }
    }
}

/// A single row of simulation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub table: String,
    pub simulation: String,
    pub values: serde_json::Value,
}

#[derive(Debug, Default)]
struct MemoryState {
    writer_running: bool,
    pending: Vec<Row>,
    committed: Vec<Row>,
    readable: Vec<Row>,
    written_tables: BTreeSet<String>,
}

/// In-process storage engine.
///
/// Writes are queued as pending until the writer drains (on
/// [`Storage::wait_until_idle`] or [`Storage::stop_accepting_writes`]); readers
/// only see rows committed before the last [`Storage::refresh_readable_view`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    idle: Condvar,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a row; restarts the writer if it was stopped.
    pub fn write(&self, row: Row) {
        let mut state = self.lock();
        state.writer_running = true;
        state.written_tables.insert(row.table.clone());
        state.pending.push(row);
    }

    /// Rows visible to readers.
    pub fn readable(&self) -> Vec<Row> {
        self.lock().readable.clone()
    }

    /// Readable rows of one table.
    pub fn table(&self, table: &str) -> Vec<Row> {
        self.lock()
            .readable
            .iter()
            .filter(|row| row.table == table)
            .cloned()
            .collect()
    }

    /// Tables written since write tracking was last cleared.
    pub fn written_tables(&self) -> Vec<String> {
        self.lock().written_tables.iter().cloned().collect()
    }

    pub fn pending_writes(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_writer_running(&self) -> bool {
        self.lock().writer_running
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self, state: &mut MemoryState) {
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        self.idle.notify_all();
    }
}

impl Storage for MemoryStorage {
    fn clear_write_tracking(&self) {
        self.lock().written_tables.clear();
    }

    fn wait_until_idle(&self) {
        let mut state = self.lock();
        self.drain(&mut state);
        while !state.pending.is_empty() {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn refresh_readable_view(&self) {
        let mut state = self.lock();
        state.readable = state.committed.clone();
    }

    fn stop_accepting_writes(&self) {
        let mut state = self.lock();
        self.drain(&mut state);
        state.writer_running = false;
    }
}
