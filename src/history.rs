//! Ingest history: the single-writer, many-reader store of [`IngestRecord`]s
//! the Router consults for idempotence (§3 "Ingest Record", §5 "the ingest
//! history is a single-writer, many-reader store with transactional inserts").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::brains::BrainKind;

/// Outcome of a single brain's write during one ingest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrainOutcome {
    Ok,
    Failed,
}

impl BrainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrainOutcome::Ok => "ok",
            BrainOutcome::Failed => "failed",
        }
    }
}

/// Overall outcome of an `Ingest` call (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Ingested,
    SkippedDuplicate,
    Partial,
    Failed,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Ingested => "ingested",
            IngestOutcome::SkippedDuplicate => "skipped_duplicate",
            IngestOutcome::Partial => "partial",
            IngestOutcome::Failed => "failed",
        }
    }
}

/// An immutable-once-written record of one packet's ingestion (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub packet_id: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub outcome: IngestOutcome,
    pub per_brain: HashMap<BrainKind, BrainOutcome>,
    pub error_trail: Vec<String>,
}

impl IngestRecord {
    /// Whether `brain` succeeded on the attempt this record reflects.
    pub fn brain_ok(&self, brain: BrainKind) -> bool {
        matches!(self.per_brain.get(&brain), Some(BrainOutcome::Ok))
    }
}

/// Append-only, `packet_id`-indexed ingest history.
///
/// Backed by a `DashMap` rather than a real append-only log/WAL — Nancy's
/// durable persistence layer is an external collaborator (§1 Non-goals);
/// this in-memory index is the reference implementation of the index the
/// Router reads for idempotence.
#[derive(Default)]
pub struct IngestHistory {
    by_packet_id: DashMap<String, IngestRecord>,
}

impl IngestHistory {
    pub fn new() -> Self {
        Self {
            by_packet_id: DashMap::new(),
        }
    }

    pub fn get(&self, packet_id: &str) -> Option<IngestRecord> {
        self.by_packet_id.get(packet_id).map(|r| r.value().clone())
    }

    /// Write or overwrite the record for `packet_id`. Called once per ingest
    /// attempt, after all brain dispatches for that attempt have resolved
    /// (§4.3 step 6: "Record the IngestRecord atomically before returning").
    pub fn put(&self, record: IngestRecord) {
        self.by_packet_id.insert(record.packet_id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.by_packet_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_packet_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(packet_id: &str, outcome: IngestOutcome) -> IngestRecord {
        IngestRecord {
            packet_id: packet_id.to_string(),
            received_at: Utc::now(),
            processed_at: Utc::now(),
            outcome,
            per_brain: HashMap::new(),
            error_trail: Vec::new(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let history = IngestHistory::new();
        history.put(record("p1", IngestOutcome::Ingested));
        let fetched = history.get("p1").unwrap();
        assert_eq!(fetched.outcome, IngestOutcome::Ingested);
    }

    #[test]
    fn unknown_packet_id_returns_none() {
        let history = IngestHistory::new();
        assert!(history.get("missing").is_none());
    }

    #[test]
    fn put_overwrites_the_prior_record_for_the_same_packet() {
        let history = IngestHistory::new();
        history.put(record("p1", IngestOutcome::Partial));
        history.put(record("p1", IngestOutcome::Ingested));
        assert_eq!(history.get("p1").unwrap().outcome, IngestOutcome::Ingested);
    }
}
