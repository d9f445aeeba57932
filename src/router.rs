//! Ingestion Router (C3, §4.3): fans a validated packet's sub-payloads out
//! to the brains that own them, with per-brain retry/backoff, bounded
//! in-flight windows, and a global admission cap — grounded on the
//! teacher's `McpClient::call_tool_with_retry` exponential-backoff loop
//! (`examples/dropbox-dTOOL/codex_dashflow/crates/mcp/src/client.rs`),
//! generalized from a single retrying call to a concurrent fan-out with
//! jittered backoff per §4.3 step 4.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::brains::{AnalyticalBrain, BrainKind, GraphBrain, VectorBrain};
use crate::config::RetrySection;
use crate::error::BrainError;
use crate::history::{BrainOutcome, IngestHistory, IngestOutcome, IngestRecord};
use crate::metrics::Metrics;
use crate::packet::{validate, KnowledgePacket, ValidatedPacket};

/// Response shape for `POST /ingest/knowledge-packet` (§6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestResponse {
    pub outcome: IngestOutcome,
    pub packet_id: String,
    pub per_brain: HashMap<BrainKind, BrainOutcome>,
}

struct BrainSemaphores {
    vector: Semaphore,
    analytical: Semaphore,
    graph: Semaphore,
}

/// Fans a single packet's content out to the three storage brains and
/// records the outcome in the [`IngestHistory`] (§4.3).
pub struct IngestionRouter {
    vector: Arc<dyn VectorBrain>,
    analytical: Arc<dyn AnalyticalBrain>,
    graph: Arc<dyn GraphBrain>,
    history: Arc<IngestHistory>,
    metrics: Arc<Metrics>,
    retry: RetrySection,
    per_brain_semaphores: BrainSemaphores,
    admission: Semaphore,
    admission_capacity: u32,
}

impl IngestionRouter {
    pub fn new(
        vector: Arc<dyn VectorBrain>,
        analytical: Arc<dyn AnalyticalBrain>,
        graph: Arc<dyn GraphBrain>,
        history: Arc<IngestHistory>,
        metrics: Arc<Metrics>,
        retry: RetrySection,
        per_brain_in_flight: usize,
        ingest_in_flight: usize,
    ) -> Self {
        Self {
            vector,
            analytical,
            graph,
            history,
            metrics,
            retry,
            per_brain_semaphores: BrainSemaphores {
                vector: Semaphore::new(per_brain_in_flight),
                analytical: Semaphore::new(per_brain_in_flight),
                graph: Semaphore::new(per_brain_in_flight),
            },
            admission: Semaphore::new(ingest_in_flight),
            admission_capacity: ingest_in_flight as u32,
        }
    }

    /// Block until every in-flight ingest has resolved, then return. Used
    /// by `NancyCore::set_mode` before a mode transition (§4.7: "Mode
    /// transitions never drop in-flight work; the Ingestion Router drains
    /// before switching").
    pub async fn drain(&self) {
        // Acquiring the full admission capacity blocks until every
        // in-flight holder has released its permit, i.e. until nothing is
        // in flight, then immediately gives the capacity back.
        let _ = self.admission.acquire_many(self.admission_capacity).await;
    }

    /// `Ingest(packet) -> IngestOutcome` (§4.3).
    #[instrument(skip(self, raw), fields(packet_id = tracing::field::Empty))]
    pub async fn ingest(&self, raw: &serde_json::Value) -> Result<IngestResponse, crate::error::NancyError> {
        self.metrics.record_packet_received();
        let _permit = self
            .admission
            .acquire()
            .await
            .expect("admission semaphore is never closed");

        // Step 1: validate.
        let validated: ValidatedPacket = match validate(raw) {
            Ok(v) => v,
            Err(e) => {
                self.metrics.record_packet_outcome(IngestOutcome::Failed);
                return Err(e.into());
            }
        };
        let packet = validated.into_inner();
        tracing::Span::current().record("packet_id", &packet.packet_id.as_str());

        // Step 2: idempotence check.
        let prior = self.history.get(&packet.packet_id);
        if let Some(prior) = &prior {
            if prior.outcome == IngestOutcome::Ingested {
                self.metrics.record_packet_outcome(IngestOutcome::SkippedDuplicate);
                return Ok(IngestResponse {
                    outcome: IngestOutcome::SkippedDuplicate,
                    packet_id: packet.packet_id,
                    per_brain: prior.per_brain.clone(),
                });
            }
            // outcome == Partial (or Failed): re-attempt only the brains
            // that did not previously succeed (§9 open question: "this
            // spec decides re-attempt only the failed brains").
        }

        let received_at = chrono::Utc::now();
        let response = self.dispatch(&packet, prior.as_ref()).await;

        let record = IngestRecord {
            packet_id: packet.packet_id.clone(),
            received_at,
            processed_at: chrono::Utc::now(),
            outcome: response.outcome,
            per_brain: response.per_brain.clone(),
            error_trail: Vec::new(),
        };
        self.history.put(record);
        self.metrics.record_packet_outcome(response.outcome);
        info!(outcome = response.outcome.as_str(), "ingest complete");
        Ok(response)
    }

    async fn dispatch(&self, packet: &KnowledgePacket, prior: Option<&IngestRecord>) -> IngestResponse {
        let already_ok = |brain: BrainKind| prior.is_some_and(|p| p.brain_ok(brain));

        let want_vector = packet.has_vector_data() && !already_ok(BrainKind::Vector);
        let want_analytical = packet.has_analytical_data() && !already_ok(BrainKind::Analytical);
        let want_graph = packet.has_graph_data() && !already_ok(BrainKind::Graph);

        let (vector_result, analytical_result, graph_result) = tokio::join!(
            self.dispatch_vector(packet, want_vector),
            self.dispatch_analytical(packet, want_analytical),
            self.dispatch_graph(packet, want_graph),
        );

        let mut per_brain = HashMap::new();
        if let Some(p) = prior {
            per_brain.extend(p.per_brain.clone());
        }
        if let Some(outcome) = vector_result {
            per_brain.insert(BrainKind::Vector, outcome);
        }
        if let Some(outcome) = analytical_result {
            per_brain.insert(BrainKind::Analytical, outcome);
        }
        if let Some(outcome) = graph_result {
            per_brain.insert(BrainKind::Graph, outcome);
        }

        let targeted = [
            packet.has_vector_data(),
            packet.has_analytical_data(),
            packet.has_graph_data(),
        ]
        .iter()
        .filter(|x| **x)
        .count();
        let ok_count = per_brain.values().filter(|o| **o == BrainOutcome::Ok).count();

        let outcome = if ok_count == targeted && targeted > 0 {
            IngestOutcome::Ingested
        } else if ok_count > 0 {
            IngestOutcome::Partial
        } else {
            IngestOutcome::Failed
        };

        IngestResponse {
            outcome,
            packet_id: packet.packet_id.clone(),
            per_brain,
        }
    }

    async fn dispatch_vector(&self, packet: &KnowledgePacket, want: bool) -> Option<BrainOutcome> {
        if !want {
            return None;
        }
        let data = packet.content.vector_data.as_ref()?;
        let _permit = self.per_brain_semaphores.vector.acquire().await.ok()?;
        let vector = Arc::clone(&self.vector);
        let packet_id = packet.packet_id.clone();
        let chunks = data.chunks.clone();
        let model = data.embedding_model.clone();
        let result = self
            .retry_dispatch(BrainKind::Vector, move || {
                let vector = Arc::clone(&vector);
                let packet_id = packet_id.clone();
                let chunks = chunks.clone();
                let model = model.clone();
                async move { vector.upsert_chunks(&packet_id, &chunks, &model).await }
            })
            .await;
        Some(self.record_brain_result(BrainKind::Vector, result))
    }

    async fn dispatch_analytical(&self, packet: &KnowledgePacket, want: bool) -> Option<BrainOutcome> {
        if !want {
            return None;
        }
        let data = packet.content.analytical_data.as_ref()?.clone();
        let _permit = self.per_brain_semaphores.analytical.acquire().await.ok()?;
        let analytical = Arc::clone(&self.analytical);
        let packet_id = packet.packet_id.clone();
        let result = self
            .retry_dispatch(BrainKind::Analytical, move || {
                let analytical = Arc::clone(&analytical);
                let packet_id = packet_id.clone();
                let data = data.clone();
                async move { crate::brains::upsert_analytical_data(analytical.as_ref(), &packet_id, &data).await }
            })
            .await;
        Some(self.record_brain_result(BrainKind::Analytical, result))
    }

    async fn dispatch_graph(&self, packet: &KnowledgePacket, want: bool) -> Option<BrainOutcome> {
        if !want {
            return None;
        }
        let data = packet.content.graph_data.as_ref()?.clone();
        let _permit = self.per_brain_semaphores.graph.acquire().await.ok()?;
        let graph = Arc::clone(&self.graph);
        // Entities-before-relationships within one packet (§4.3, §5, §8).
        let result = self
            .retry_dispatch(BrainKind::Graph, move || {
                let graph = Arc::clone(&graph);
                let entities = data.entities.clone();
                let relationships = data.relationships.clone();
                async move {
                    graph.upsert_entities(&entities).await?;
                    graph.upsert_relationships(&relationships).await?;
                    Ok(crate::brains::Ack)
                }
            })
            .await;
        Some(self.record_brain_result(BrainKind::Graph, result))
    }

    fn record_brain_result(&self, brain: BrainKind, result: Result<crate::brains::Ack, BrainError>) -> BrainOutcome {
        self.metrics.record_brain_write(brain);
        match result {
            Ok(_) => BrainOutcome::Ok,
            Err(e) => {
                warn!(brain = %brain, error = %e, "brain dispatch failed after retries");
                BrainOutcome::Failed
            }
        }
    }

    /// Retry `op` up to `retry.max_attempts` times with exponential backoff
    /// (base `retry.base_ms`, cap `retry.cap_ms`, jitter `retry.jitter`),
    /// stopping immediately on a non-transient [`BrainError`] (§4.3 step 4).
    async fn retry_dispatch<F, Fut>(&self, brain: BrainKind, op: F) -> Result<crate::brains::Ack, BrainError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<crate::brains::Ack, BrainError>>,
    {
        let mut attempt = 0u32;
        loop {
            let started = std::time::Instant::now();
            let result = op().await;
            self.metrics
                .observe_brain_latency(brain, started.elapsed().as_secs_f64());
            match result {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(brain = %brain, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying brain dispatch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.base_ms as f64;
        let cap = self.retry.cap_ms as f64;
        let exp = base * 2f64.powi(attempt as i32);
        let capped = exp.min(cap);
        let jitter_span = capped * self.retry.jitter;
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brains::{InMemoryAnalyticalBrain, InMemoryGraphBrain, InMemoryVectorBrain};
    use serde_json::json;

    fn router() -> IngestionRouter {
        IngestionRouter::new(
            Arc::new(InMemoryVectorBrain::new()),
            Arc::new(InMemoryAnalyticalBrain::new()),
            Arc::new(InMemoryGraphBrain::new()),
            Arc::new(IngestHistory::new()),
            Arc::new(Metrics::new()),
            RetrySection::default(),
            16,
            64,
        )
    }

    fn packet_with_chunk(text: &str) -> serde_json::Value {
        let content = json!({
            "vector_data": {
                "chunks": [{"chunk_id": "c1", "text": text}],
                "embedding_model": "mock"
            }
        });
        let packet_id = crate::packet::content_hash(&content);
        json!({
            "packet_version": "1.0",
            "packet_id": packet_id,
            "timestamp": "2026-01-01T00:00:00Z",
            "source": {
                "mcp_server_name": "document-processor",
                "server_version": "1.0.0",
                "original_location": "/docs/thermal.md",
                "content_type": "document"
            },
            "metadata": {"title": "Thermal Analysis"},
            "content": content
        })
    }

    #[tokio::test]
    async fn idempotent_ingest_skips_the_second_call() {
        let router = router();
        let packet = packet_with_chunk("Thermal constraints: max 85C");

        let first = router.ingest(&packet).await.unwrap();
        assert_eq!(first.outcome, IngestOutcome::Ingested);

        let second = router.ingest(&packet).await.unwrap();
        assert_eq!(second.outcome, IngestOutcome::SkippedDuplicate);
    }

    #[tokio::test]
    async fn fan_out_completeness_issues_exactly_one_write_per_present_sub_payload() {
        let router = router();
        let content = json!({
            "vector_data": {
                "chunks": [{"chunk_id": "c1", "text": "hello"}],
                "embedding_model": "mock"
            },
            "graph_data": {
                "entities": [{"type": "Person", "name": "Sarah Chen"}],
                "relationships": []
            }
        });
        let packet_id = crate::packet::content_hash(&content);
        let packet = json!({
            "packet_version": "1.0",
            "packet_id": packet_id,
            "timestamp": "2026-01-01T00:00:00Z",
            "source": {
                "mcp_server_name": "document-processor",
                "server_version": "1.0.0",
                "original_location": "/docs/thermal.md",
                "content_type": "document"
            },
            "metadata": {"title": "Thermal Analysis"},
            "content": content
        });

        let response = router.ingest(&packet).await.unwrap();
        assert_eq!(response.outcome, IngestOutcome::Ingested);
        assert_eq!(response.per_brain.len(), 2);
        assert!(response.per_brain.contains_key(&BrainKind::Vector));
        assert!(response.per_brain.contains_key(&BrainKind::Graph));
        assert!(!response.per_brain.contains_key(&BrainKind::Analytical));
    }

    #[tokio::test]
    async fn graph_fan_out_entities_resolve_to_a_queryable_authored_relationship() {
        let vector = Arc::new(InMemoryVectorBrain::new());
        let analytical = Arc::new(InMemoryAnalyticalBrain::new());
        let graph = Arc::new(InMemoryGraphBrain::new());
        let router = IngestionRouter::new(
            vector,
            analytical,
            graph.clone(),
            Arc::new(IngestHistory::new()),
            Arc::new(Metrics::new()),
            RetrySection::default(),
            16,
            64,
        );

        let content = json!({
            "graph_data": {
                "entities": [
                    {"type": "Person", "name": "Sarah Chen"},
                    {"type": "Document", "name": "thermal.md"}
                ],
                "relationships": [
                    {
                        "source_ref": {"type": "Person", "name": "Sarah Chen"},
                        "relationship": "AUTHORED",
                        "target_ref": {"type": "Document", "name": "thermal.md"}
                    }
                ]
            }
        });
        let packet_id = crate::packet::content_hash(&content);
        let packet = json!({
            "packet_version": "1.0",
            "packet_id": packet_id,
            "timestamp": "2026-01-01T00:00:00Z",
            "source": {
                "mcp_server_name": "document-processor",
                "server_version": "1.0.0",
                "original_location": "/docs/thermal.md",
                "content_type": "document"
            },
            "metadata": {"title": "Thermal Analysis"},
            "content": content
        });

        let response = router.ingest(&packet).await.unwrap();
        assert_eq!(response.outcome, IngestOutcome::Ingested);

        let author_ref = crate::packet::EntityRef {
            entity_type: crate::packet::EntityType::Person,
            name: "Sarah Chen".to_string(),
        };
        let found = graph
            .find_by_property("Person", "name", &json!("Sarah Chen"))
            .await
            .unwrap();
        assert_eq!(found, vec![author_ref.clone()]);

        let neighbors = graph.neighbors(&author_ref, 1, None).await.unwrap();
        assert!(neighbors.entities.iter().any(|e| e.name == "thermal.md"));
        assert!(neighbors
            .relationships
            .iter()
            .any(|r| r.relationship == crate::packet::RelationshipKind::Authored));
    }

    #[tokio::test]
    async fn partial_failure_then_reingest_converges() {
        let vector = Arc::new(InMemoryVectorBrain::new());
        let analytical = Arc::new(InMemoryAnalyticalBrain::new());
        let graph = Arc::new(InMemoryGraphBrain::new());
        let router = IngestionRouter::new(
            vector.clone(),
            analytical.clone(),
            graph.clone(),
            Arc::new(IngestHistory::new()),
            Arc::new(Metrics::new()),
            RetrySection { max_attempts: 1, base_ms: 1, cap_ms: 1, jitter: 0.0 },
            16,
            64,
        );

        let content = json!({
            "vector_data": {"chunks": [{"chunk_id": "c1", "text": "hello"}], "embedding_model": "mock"},
            "analytical_data": {"structured_fields": {"status": "active"}},
            "graph_data": {"entities": [{"type": "Person", "name": "Sarah Chen"}], "relationships": []}
        });
        let packet_id = crate::packet::content_hash(&content);
        let packet = json!({
            "packet_version": "1.0",
            "packet_id": packet_id,
            "timestamp": "2026-01-01T00:00:00Z",
            "source": {
                "mcp_server_name": "document-processor",
                "server_version": "1.0.0",
                "original_location": "/docs/thermal.md",
                "content_type": "document"
            },
            "metadata": {"title": "Thermal Analysis"},
            "content": content
        });

        analytical.inject_fault(Some(BrainError::BackendWrite("disk full".into())));
        let first = router.ingest(&packet).await.unwrap();
        assert_eq!(first.outcome, IngestOutcome::Partial);
        assert_eq!(first.per_brain[&BrainKind::Analytical], BrainOutcome::Failed);

        analytical.inject_fault(None);
        let second = router.ingest(&packet).await.unwrap();
        assert_eq!(second.outcome, IngestOutcome::Ingested);
        assert_eq!(second.per_brain[&BrainKind::Analytical], BrainOutcome::Ok);
    }
}
