//! Turn log
//!
//! One record per completed turn: how it was routed, what each specialist
//! did, and a hash of the history it left behind. The log keeps the most
//! recent `capacity` records; older ones are evicted first.

use crate::memory::ConversationMessage;
use crate::models::{RouteBasis, Routing, SpecialistStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: Uuid,
    pub session_id: String,
    pub question: String,
    pub routing: Routing,
    pub basis: RouteBasis,
    pub structured_status: SpecialistStatus,
    pub search_status: SpecialistStatus,
    pub final_answer: String,
    pub history_hash: String,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_TURN_LOG_CAPACITY: usize = 1_000;

/// Bounded turn record storage, in insertion order
pub struct TurnLog {
    records: Arc<RwLock<VecDeque<TurnRecord>>>,
    capacity: usize,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TURN_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity,
        }
    }

    /// Store a turn record, evicting the oldest once full
    pub async fn record(&self, record: TurnRecord) -> Result<Uuid> {
        let turn_id = record.turn_id;
        let mut records = self.records.write().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(turn_id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Records of one session, oldest first
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<TurnRecord>> {
        let records = self.records.read().await;

        let mut items: Vec<TurnRecord> = records
            .iter()
            .filter(|record| record.session_id == session_id)
            .cloned()
            .collect();

        items.sort_by_key(|record| record.created_at);
        Ok(items)
    }

    /// Check a record's hash against a history.
    pub async fn verify_integrity(
        &self,
        turn_id: Uuid,
        history: &[ConversationMessage],
    ) -> Result<bool> {
        let records = self.records.read().await;

        match records.iter().find(|record| record.turn_id == turn_id) {
            Some(record) => Ok(compute_history_hash(history) == record.history_hash),
            None => Ok(false),
        }
    }
}

impl Default for TurnLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 over the JSON form of the history, hex encoded
pub fn compute_history_hash(history: &[ConversationMessage]) -> String {
    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), history).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
