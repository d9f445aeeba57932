//! Query Orchestrator (C6, §4.6): plans, executes, and merges sub-queries
//! across the brains selected by the Query Analyzer, then synthesizes a
//! final answer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::brains::{
    AnalyticalBrain, Answer, BrainKind, EvidenceItem, EvidenceSource, GraphBrain, LlmBrain,
    SearchFilter, StructuredQuery, VectorBrain,
};
use crate::config::OrchestrationSection;
use crate::error::NancyError;
use crate::metrics::Metrics;
use crate::packet::{EntityRef, PriorityBrain};

use super::analyzer::{QueryAnalyzer, QueryIntent, SynthesisMode};

/// Caller-supplied knobs for a single query (§6 `POST /query` body).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub priority_brain: Option<PriorityBrain>,
    #[serde(default)]
    pub include_raw_evidence: bool,
}

const DEFAULT_K: usize = 8;

/// One piece of merged evidence, with enough identity to resolve a citation
/// back to the concrete packet/chunk/entity/row it came from (§4.6 step 4,
/// §8 "Citation soundness").
#[derive(Debug, Clone, Serialize)]
pub struct MergedEvidence {
    pub source: EvidenceSource,
    pub packet_id: String,
    pub reference: EvidenceRef,
    pub text: String,
    pub normalized_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceRef {
    Chunk { chunk_id: String },
    Entity { entity: EntityRef },
    Row { row_index: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub source: EvidenceSource,
    pub packet_id: String,
    pub reference: EvidenceRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisOutcome {
    Normal,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub intent: QueryIntent,
    pub per_brain_timings_ms: HashMap<BrainKind, u64>,
    pub brains_used: Vec<BrainKind>,
    pub degraded_brains: Vec<BrainKind>,
    pub synthesis: SynthesisOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_evidence: Option<Vec<MergedEvidence>>,
}

pub struct QueryOrchestrator {
    analyzer: QueryAnalyzer,
    vector: Arc<dyn VectorBrain>,
    analytical: Arc<dyn AnalyticalBrain>,
    graph: Arc<dyn GraphBrain>,
    llm: Arc<dyn LlmBrain>,
    metrics: Arc<Metrics>,
    per_brain_timeout: Duration,
    total_timeout: Duration,
}

impl QueryOrchestrator {
    pub fn new(
        vector: Arc<dyn VectorBrain>,
        analytical: Arc<dyn AnalyticalBrain>,
        graph: Arc<dyn GraphBrain>,
        llm: Arc<dyn LlmBrain>,
        metrics: Arc<Metrics>,
        orchestration: &OrchestrationSection,
    ) -> Self {
        Self {
            analyzer: QueryAnalyzer::new(Arc::clone(&llm), Arc::clone(&graph)),
            vector,
            analytical,
            graph,
            llm,
            metrics,
            per_brain_timeout: Duration::from_millis(orchestration.per_brain_timeout_ms),
            total_timeout: Duration::from_millis(orchestration.total_timeout_ms),
        }
    }

    /// `Query(question, options) -> QueryResponse` (§4.6).
    pub async fn query(&self, question: &str, options: QueryOptions) -> Result<QueryResponse, NancyError> {
        self.metrics.record_query_received();
        let started = Instant::now();

        let result = tokio::time::timeout(self.total_timeout, self.query_inner(question, options)).await;
        let response = match result {
            Ok(inner) => inner?,
            Err(_) => return Err(NancyError::Timeout),
        };

        self.metrics.observe_query_latency(started.elapsed().as_secs_f64());
        self.metrics
            .record_query_outcome(response.synthesis == SynthesisOutcome::Degraded);
        info!(
            intent = ?response.intent.kind,
            synthesis = ?response.synthesis,
            "query complete"
        );
        Ok(response)
    }

    async fn query_inner(&self, question: &str, options: QueryOptions) -> Result<QueryResponse, NancyError> {
        let intent = self.analyzer.analyze(question, options.priority_brain).await?;
        let k = options.k.unwrap_or(DEFAULT_K);

        let (vector_result, analytical_result, graph_result) = tokio::join!(
            self.run_vector(&intent, question, k),
            self.run_analytical(&intent),
            self.run_graph(&intent, question),
        );

        let mut evidence = Vec::new();
        let mut per_brain_timings_ms = HashMap::new();
        let mut degraded_brains = Vec::new();
        let mut brains_used = Vec::new();

        for (brain, outcome) in [
            (BrainKind::Vector, vector_result),
            (BrainKind::Analytical, analytical_result),
            (BrainKind::Graph, graph_result),
        ] {
            match outcome {
                Some((items, elapsed)) => {
                    per_brain_timings_ms.insert(brain, elapsed.as_millis() as u64);
                    brains_used.push(brain);
                    if items.is_empty() {
                        // ran, but had nothing to offer; not a failure
                    }
                    evidence.extend(items);
                }
                None => {}
            }
        }

        // a brain only appears in degraded_brains if it was targeted but
        // produced no entry above (timeout, error, or not implemented for
        // this intent).
        for brain in &intent.target_brains {
            if !brains_used.contains(brain) {
                degraded_brains.push(*brain);
            }
        }

        if brains_used.is_empty() {
            return Err(NancyError::NoHealthyBrains);
        }

        let deduped = dedup_evidence(evidence);
        let mut sorted = deduped;
        sorted.sort_by(|a, b| {
            b.normalized_score
                .partial_cmp(&a.normalized_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.packet_id.cmp(&b.packet_id))
                .then_with(|| secondary_id(a).cmp(&secondary_id(b)))
        });

        let style = match intent.synthesis_mode {
            SynthesisMode::Tabular => crate::brains::SynthesisStyle::Detailed,
            SynthesisMode::Extractive => crate::brains::SynthesisStyle::Concise,
            SynthesisMode::Abstractive => crate::brains::SynthesisStyle::BulletPoints,
        };

        let llm_input: Vec<EvidenceItem> = sorted
            .iter()
            .map(|e| EvidenceItem {
                source: e.source,
                text: e.text.clone(),
                score: e.normalized_score,
            })
            .collect();

        let (answer, synthesis) = match self.llm.synthesize(question, &llm_input, style).await {
            Ok(answer) => (answer, SynthesisOutcome::Normal),
            Err(e) => {
                warn!(error = %e, "llm synthesis failed, falling back to extractive");
                (crate::brains::extractive_synthesis(&llm_input, style), SynthesisOutcome::Degraded)
            }
        };

        let citations = resolve_citations(&answer, &sorted);

        Ok(QueryResponse {
            answer_text: answer.text,
            citations,
            intent,
            per_brain_timings_ms,
            brains_used,
            degraded_brains,
            synthesis,
            raw_evidence: options.include_raw_evidence.then_some(sorted),
        })
    }

    async fn run_vector(&self, intent: &QueryIntent, question: &str, k: usize) -> Option<(Vec<MergedEvidence>, Duration)> {
        if !intent.target_brains.contains(&BrainKind::Vector) {
            return None;
        }
        let started = Instant::now();
        let filter = SearchFilter::default();
        let call = self.vector.search(question, k, Some(&filter));
        match tokio::time::timeout(self.per_brain_timeout, call).await {
            Ok(Ok(chunks)) => {
                self.metrics.record_brain_read(BrainKind::Vector);
                let elapsed = started.elapsed();
                self.metrics.observe_brain_latency(BrainKind::Vector, elapsed.as_secs_f64());
                let evidence = chunks
                    .into_iter()
                    .map(|c| MergedEvidence {
                        source: EvidenceSource::Vector,
                        packet_id: c.packet_id,
                        reference: EvidenceRef::Chunk { chunk_id: c.chunk_id },
                        text: c.text,
                        normalized_score: c.score.clamp(0.0, 1.0),
                    })
                    .collect();
                Some((evidence, elapsed))
            }
            Ok(Err(e)) => {
                warn!(brain = "vector", error = %e, "sub-query failed");
                None
            }
            Err(_) => {
                warn!(brain = "vector", "sub-query timed out");
                None
            }
        }
    }

    async fn run_analytical(&self, intent: &QueryIntent) -> Option<(Vec<MergedEvidence>, Duration)> {
        if !intent.target_brains.contains(&BrainKind::Analytical) {
            return None;
        }
        let started = Instant::now();
        let query = StructuredQuery::default();
        let call = self.analytical.query(&query);
        match tokio::time::timeout(self.per_brain_timeout, call).await {
            Ok(Ok(result_set)) => {
                self.metrics.record_brain_read(BrainKind::Analytical);
                let elapsed = started.elapsed();
                self.metrics
                    .observe_brain_latency(BrainKind::Analytical, elapsed.as_secs_f64());
                let evidence = result_set
                    .rows
                    .into_iter()
                    .enumerate()
                    .map(|(row_index, row)| MergedEvidence {
                        source: EvidenceSource::Analytical,
                        packet_id: row.packet_id,
                        reference: EvidenceRef::Row { row_index },
                        text: serde_json::to_string(&row.fields).unwrap_or_default(),
                        // §4.6: "analytical rows receive a flat relevance
                        // unless the query supplies an ordering"
                        normalized_score: 0.5,
                    })
                    .collect();
                Some((evidence, elapsed))
            }
            Ok(Err(e)) => {
                warn!(brain = "analytical", error = %e, "sub-query failed");
                None
            }
            Err(_) => {
                warn!(brain = "analytical", "sub-query timed out");
                None
            }
        }
    }

    async fn run_graph(&self, intent: &QueryIntent, question: &str) -> Option<(Vec<MergedEvidence>, Duration)> {
        if !intent.target_brains.contains(&BrainKind::Graph) {
            return None;
        }
        if intent.extracted_entities.is_empty() {
            return Some((Vec::new(), Duration::ZERO));
        }
        let started = Instant::now();
        let mut evidence = Vec::new();
        for entity in &intent.extracted_entities {
            let call = self.graph.neighbors(entity, 1, None);
            match tokio::time::timeout(self.per_brain_timeout, call).await {
                Ok(Ok(subgraph)) => {
                    self.metrics.record_brain_read(BrainKind::Graph);
                    for neighbor in subgraph.entities {
                        let relationship_confidence = subgraph
                            .relationships
                            .iter()
                            .find(|r| r.target_ref == neighbor.entity_ref() || r.source_ref == neighbor.entity_ref())
                            .map(|r| r.confidence)
                            .unwrap_or(1.0);
                        // path_length is 1 for direct neighbors (§4.6 step 4).
                        let normalized_score = (1.0 / (1.0 + 1.0)) * relationship_confidence;
                        evidence.push(MergedEvidence {
                            source: EvidenceSource::Graph,
                            packet_id: String::new(),
                            reference: EvidenceRef::Entity { entity: neighbor.entity_ref() },
                            text: format!("{} ({})", neighbor.name, entity_type_label(&neighbor)),
                            normalized_score,
                        });
                    }
                }
                Ok(Err(e)) => warn!(brain = "graph", error = %e, "sub-query failed"),
                Err(_) => warn!(brain = "graph", question, "sub-query timed out"),
            }
        }
        let elapsed = started.elapsed();
        self.metrics.observe_brain_latency(BrainKind::Graph, elapsed.as_secs_f64());
        Some((evidence, elapsed))
    }
}

fn entity_type_label(entity: &crate::packet::Entity) -> String {
    serde_json::to_value(entity.entity_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn secondary_id(e: &MergedEvidence) -> String {
    match &e.reference {
        EvidenceRef::Chunk { chunk_id } => chunk_id.clone(),
        EvidenceRef::Entity { entity } => entity.name.clone(),
        EvidenceRef::Row { row_index } => row_index.to_string(),
    }
}

fn evidence_key(e: &MergedEvidence) -> (String, String) {
    (e.packet_id.clone(), secondary_id(e))
}

/// Deduplicate evidence by `(packet_id, chunk_id|entity_id|row_id)` (§4.6
/// step 4), keeping the highest-scored instance of each key.
fn dedup_evidence(evidence: Vec<MergedEvidence>) -> Vec<MergedEvidence> {
    let mut best: HashMap<(String, String), MergedEvidence> = HashMap::new();
    for item in evidence {
        let key = evidence_key(&item);
        match best.get(&key) {
            Some(existing) if existing.normalized_score >= item.normalized_score => {}
            _ => {
                best.insert(key, item);
            }
        }
    }
    best.into_values().collect()
}

/// `answer.citations` is a list of evidence *sources* in the order the
/// synthesizer consumed them; since the evidence bundle handed to the LLM
/// is the same descending-score order as `sorted`, each citation resolves
/// to the next not-yet-consumed merged-evidence item of that source (§8
/// "Citation soundness").
fn resolve_citations(answer: &Answer, sorted: &[MergedEvidence]) -> Vec<Citation> {
    let mut cursors: HashMap<EvidenceSource, usize> = HashMap::new();
    let mut citations = Vec::new();
    for source in &answer.citations {
        let cursor = cursors.entry(*source).or_insert(0);
        if let Some(item) = sorted.iter().filter(|e| e.source == *source).nth(*cursor) {
            citations.push(Citation {
                source: item.source,
                packet_id: item.packet_id.clone(),
                reference: item.reference.clone(),
            });
        }
        *cursor += 1;
    }
    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brains::{InMemoryAnalyticalBrain, InMemoryGraphBrain, InMemoryLlmBrain, InMemoryVectorBrain};
    use crate::packet::{Chunk, Entity, EntityType, Relationship, RelationshipKind};

    fn orchestrator() -> (
        QueryOrchestrator,
        Arc<InMemoryVectorBrain>,
        Arc<InMemoryGraphBrain>,
        Arc<InMemoryLlmBrain>,
    ) {
        let vector = Arc::new(InMemoryVectorBrain::new());
        let analytical = Arc::new(InMemoryAnalyticalBrain::new());
        let graph = Arc::new(InMemoryGraphBrain::new());
        let llm = Arc::new(InMemoryLlmBrain::new());
        let orchestration = OrchestrationSection::default();
        let orch = QueryOrchestrator::new(
            vector.clone(),
            analytical,
            graph.clone(),
            llm.clone(),
            Arc::new(Metrics::new()),
            &orchestration,
        );
        (orch, vector, graph, llm)
    }

    #[tokio::test]
    async fn semantic_query_returns_citations_from_the_vector_brain() {
        let (orch, vector, _graph, _llm) = orchestrator();
        vector
            .upsert_chunks(
                "a".repeat(64).as_str(),
                &[Chunk {
                    chunk_id: "c1".to_string(),
                    text: "Thermal constraints: max 85C".to_string(),
                    chunk_metadata: Default::default(),
                }],
                "test-embed",
            )
            .await
            .unwrap();

        let response = orch.query("thermal constraints", QueryOptions::default()).await.unwrap();
        assert_eq!(response.synthesis, SynthesisOutcome::Normal);
        assert!(!response.citations.is_empty());
        assert!(response.answer_text.contains("85C"));
    }

    #[tokio::test]
    async fn llm_outage_degrades_to_extractive_synthesis() {
        let (orch, vector, _graph, llm) = orchestrator();
        vector
            .upsert_chunks(
                "b".repeat(64).as_str(),
                &[Chunk {
                    chunk_id: "c1".to_string(),
                    text: "fallback evidence".to_string(),
                    chunk_metadata: Default::default(),
                }],
                "test-embed",
            )
            .await
            .unwrap();
        llm.inject_fault(Some(crate::error::BrainError::ModelUnavailable("down".into())));

        let response = orch.query("tell me about fallback evidence", QueryOptions::default()).await.unwrap();
        assert_eq!(response.synthesis, SynthesisOutcome::Degraded);
        assert!(response.answer_text.contains("fallback evidence"));
    }

    #[tokio::test]
    async fn hybrid_query_merges_graph_and_vector_evidence() {
        let (orch, vector, graph, _llm) = orchestrator();
        graph
            .upsert_entities(&[
                Entity { entity_type: EntityType::Person, name: "Sarah Chen".into(), properties: Default::default(), confidence: 1.0 },
                Entity { entity_type: EntityType::Document, name: "thermal.md".into(), properties: Default::default(), confidence: 1.0 },
            ])
            .await
            .unwrap();
        graph
            .upsert_relationships(&[Relationship {
                source_ref: EntityRef { entity_type: EntityType::Person, name: "Sarah Chen".into() },
                relationship: RelationshipKind::Authored,
                target_ref: EntityRef { entity_type: EntityType::Document, name: "thermal.md".into() },
                properties: Default::default(),
                confidence: 1.0,
            }])
            .await
            .unwrap();
        vector
            .upsert_chunks(
                "c".repeat(64).as_str(),
                &[Chunk {
                    chunk_id: "c1".to_string(),
                    text: "max 85C constraint".to_string(),
                    chunk_metadata: Default::default(),
                }],
                "test-embed",
            )
            .await
            .unwrap();

        let response = orch
            .query("Who wrote the thermal analysis and what constraints did it define?", QueryOptions::default())
            .await
            .unwrap();
        assert!(response.brains_used.contains(&BrainKind::Graph));
        assert!(response.brains_used.contains(&BrainKind::Vector));
    }
}
