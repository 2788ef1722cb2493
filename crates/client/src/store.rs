//! Durable transfer store seam.
//!
//! The engine treats the store as fire-and-forget: updates are best-effort
//! and store failures are never propagated as transfer failures, so the
//! trait methods do not return errors. Implementations must not block the
//! calling thread for long.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::TransferStatus;

/// Persistent record of one transfer, as written by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub status: TransferStatus,
    pub current_bytes: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    pub updated_at: String,
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self {
            status: TransferStatus::Pending,
            current_bytes: 0,
            total_bytes: 0,
            filename: String::new(),
            mime_type: String::new(),
            updated_at: String::new(),
        }
    }
}

/// External persistent store, keyed by transfer id.
pub trait TransferStore: Send + Sync {
    /// Records a status change.
    fn update_status(&self, id: Uuid, status: TransferStatus);

    /// Records the current byte count.
    fn update_progress(&self, id: Uuid, current_bytes: u64);

    /// Records resolved metadata before any bytes are sent.
    fn update_metadata(&self, id: Uuid, filename: &str, mime_type: &str, total_bytes: u64);
}

/// In-memory store used by tests and simple embedders.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, ProgressRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the record for `id`, if any update was seen.
    pub fn snapshot(&self, id: Uuid) -> Option<ProgressRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    fn with_record(&self, id: Uuid, f: impl FnOnce(&mut ProgressRecord)) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(id).or_default();
        f(record);
        record.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

impl TransferStore for MemoryStore {
    fn update_status(&self, id: Uuid, status: TransferStatus) {
        self.with_record(id, |r| r.status = status);
    }

    fn update_progress(&self, id: Uuid, current_bytes: u64) {
        self.with_record(id, |r| r.current_bytes = current_bytes);
    }

    fn update_metadata(&self, id: Uuid, filename: &str, mime_type: &str, total_bytes: u64) {
        self.with_record(id, |r| {
            r.filename = filename.to_string();
            r.mime_type = mime_type.to_string();
            r.total_bytes = total_bytes;
        });
    }
}
