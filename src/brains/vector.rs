//! VectorBrain adapter (§4.2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrainError;
use crate::packet::Chunk;

use super::{Ack, Health};

/// Optional metadata filter for `Search` (§4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    pub packet_id: Option<String>,
    pub tags: Vec<String>,
}

/// A chunk returned by `Search`, carrying its normalized relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub packet_id: String,
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
    pub chunk_metadata: HashMap<String, Value>,
    /// Global insertion sequence, used to break score ties deterministically
    /// (§4.2: "ties broken by chunk insertion order").
    pub insertion_order: u64,
}

#[async_trait]
pub trait VectorBrain: Send + Sync {
    async fn upsert_chunks(
        &self,
        packet_id: &str,
        chunks: &[Chunk],
        embedding_model: &str,
    ) -> Result<Ack, BrainError>;

    async fn search(
        &self,
        text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, BrainError>;

    async fn health(&self) -> Health;
}

struct StoredChunk {
    packet_id: String,
    chunk: Chunk,
    insertion_order: u64,
    #[allow(dead_code)]
    embedding_model: String,
}

/// In-memory VectorBrain. Relevance is scored by lexical token overlap
/// rather than a real embedding model — a stand-in for the externally
/// owned embedding/ANN engine (§1 Non-goals: "Nancy... consumes [the
/// embedding model] through narrow adapter interfaces").
pub struct InMemoryVectorBrain {
    chunks: DashMap<String, StoredChunk>,
    next_seq: AtomicU64,
    fault: Mutex<Option<BrainError>>,
}

impl Default for InMemoryVectorBrain {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorBrain {
    pub fn new() -> Self {
        Self {
            chunks: DashMap::new(),
            next_seq: AtomicU64::new(0),
            fault: Mutex::new(None),
        }
    }

    /// Test/ops hook: force the next writes/reads to fail until cleared.
    pub fn inject_fault(&self, fault: Option<BrainError>) {
        *self.fault.lock() = fault;
    }

    fn take_fault(&self) -> Option<BrainError> {
        self.fault.lock().clone()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn overlap_score(query_tokens: &[String], text: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens: std::collections::HashSet<String> = tokenize(text).into_iter().collect();
    let hits = query_tokens.iter().filter(|t| text_tokens.contains(*t)).count();
    hits as f64 / query_tokens.len() as f64
}

#[async_trait]
impl VectorBrain for InMemoryVectorBrain {
    async fn upsert_chunks(
        &self,
        packet_id: &str,
        chunks: &[Chunk],
        embedding_model: &str,
    ) -> Result<Ack, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        for chunk in chunks {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            self.chunks.insert(
                chunk.chunk_id.clone(),
                StoredChunk {
                    packet_id: packet_id.to_string(),
                    chunk: chunk.clone(),
                    insertion_order: seq,
                    embedding_model: embedding_model.to_string(),
                },
            );
        }
        Ok(Ack)
    }

    async fn search(
        &self,
        text: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let query_tokens = tokenize(text);
        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .filter(|entry| match filter.and_then(|f| f.packet_id.as_ref()) {
                Some(pid) => pid == &entry.value().packet_id,
                None => true,
            })
            .map(|entry| {
                let stored = entry.value();
                ScoredChunk {
                    packet_id: stored.packet_id.clone(),
                    chunk_id: stored.chunk.chunk_id.clone(),
                    text: stored.chunk.text.clone(),
                    score: overlap_score(&query_tokens, &stored.chunk.text),
                    chunk_metadata: stored.chunk.chunk_metadata.clone(),
                    insertion_order: stored.insertion_order,
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.insertion_order.cmp(&b.insertion_order))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn health(&self) -> Health {
        match self.take_fault() {
            Some(e) => Health::unhealthy(e.to_string()),
            None => Health::healthy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            chunk_metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn search_ranks_by_lexical_overlap() {
        let brain = InMemoryVectorBrain::new();
        brain
            .upsert_chunks(
                "p1",
                &[
                    chunk("c1", "Thermal constraints: max 85C"),
                    chunk("c2", "Unrelated text about snacks"),
                ],
                "mock-embed",
            )
            .await
            .unwrap();

        let results = brain.search("thermal constraints", 5, None).await.unwrap();
        assert_eq!(results[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn reupsert_of_same_chunk_id_overwrites() {
        let brain = InMemoryVectorBrain::new();
        brain
            .upsert_chunks("p1", &[chunk("c1", "version one")], "m")
            .await
            .unwrap();
        brain
            .upsert_chunks("p1", &[chunk("c1", "version two")], "m")
            .await
            .unwrap();
        let results = brain.search("version", 5, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "version two");
    }

    #[tokio::test]
    async fn injected_fault_surfaces_on_next_call() {
        let brain = InMemoryVectorBrain::new();
        brain.inject_fault(Some(BrainError::BackendWrite("disk full".into())));
        let err = brain
            .upsert_chunks("p1", &[chunk("c1", "x")], "m")
            .await
            .unwrap_err();
        assert!(matches!(err, BrainError::BackendWrite(_)));
    }
}
