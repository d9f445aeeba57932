//! Query Analyzer (C5, §4.5): turns a free-text question into a
//! `QueryIntent` the Orchestrator can plan sub-queries from.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::brains::{BrainKind, GraphBrain, LlmBrain, QueryIntent as CoarseIntent};
use crate::error::Result;
use crate::packet::{EntityRef, EntityType, PriorityBrain};

const ENTITY_TYPE_NAMES: &[(&str, EntityType)] = &[
    ("Person", EntityType::Person),
    ("Document", EntityType::Document),
    ("TechnicalConcept", EntityType::TechnicalConcept),
    ("System", EntityType::System),
    ("Component", EntityType::Component),
    ("Decision", EntityType::Decision),
    ("Meeting", EntityType::Meeting),
    ("Project", EntityType::Project),
    ("Team", EntityType::Team),
    ("Role", EntityType::Role),
    ("Process", EntityType::Process),
    ("Constraint", EntityType::Constraint),
    ("Risk", EntityType::Risk),
    ("Action", EntityType::Action),
];

/// Coarse classification of what kind of answer the question wants (§3
/// "Query Intent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Semantic,
    Structured,
    Relational,
    Hybrid,
    AuthorAttribution,
    Timeline,
    Causal,
}

/// How the orchestrator should shape the final answer (§4.5 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    Extractive,
    Abstractive,
    Tabular,
}

/// Derived, transient per-query state (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryIntent {
    pub kind: IntentKind,
    pub extracted_entities: Vec<EntityRef>,
    pub confidence: f64,
    pub target_brains: Vec<BrainKind>,
    pub synthesis_mode: SynthesisMode,
}

/// Below this rule-based confidence, fall through to `LlmBrain::classify_intent`.
const RULE_CONFIDENCE_THRESHOLD: f64 = 0.6;

pub struct QueryAnalyzer {
    llm: Arc<dyn LlmBrain>,
    graph: Arc<dyn GraphBrain>,
    capitalized_phrase: Regex,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn LlmBrain>, graph: Arc<dyn GraphBrain>) -> Self {
        Self {
            llm,
            graph,
            // a run of capitalized words, e.g. "Sarah Chen" or "Thermal Analysis"
            capitalized_phrase: Regex::new(r"\b[A-Z][a-zA-Z]*(?:\s+[A-Z][a-zA-Z]*)*\b")
                .expect("static regex is valid"),
        }
    }

    /// `Analyze(question) -> QueryIntent` (§4.5).
    pub async fn analyze(&self, question: &str, priority_override: Option<PriorityBrain>) -> Result<QueryIntent> {
        let (kind, confidence) = match rule_based_kind(question) {
            Some((kind, confidence)) if confidence >= RULE_CONFIDENCE_THRESHOLD => (kind, confidence),
            _ => {
                let coarse = self.llm.classify_intent(question).await?;
                (from_coarse_intent(coarse), 0.5)
            }
        };

        let extracted_entities = self.extract_entities(question).await;
        let mut target_brains = target_brains_for(kind);
        if let Some(priority) = priority_override {
            if let Some(forced) = brain_kind_for_priority(priority) {
                if !target_brains.contains(&forced) {
                    target_brains.insert(0, forced);
                }
            }
        }

        let synthesis_mode = synthesis_mode_for(kind);

        Ok(QueryIntent {
            kind,
            extracted_entities,
            confidence,
            target_brains,
            synthesis_mode,
        })
    }

    /// Exact-match candidate phrases (capitalized-word runs) against known
    /// graph entity names (§4.5 step 3a). Heuristic-only extraction (3b) is
    /// folded into the same capitalization heuristic for the reference
    /// implementation.
    async fn extract_entities(&self, question: &str) -> Vec<EntityRef> {
        let mut found = Vec::new();
        for candidate in self.capitalized_phrase.find_iter(question) {
            let candidate = candidate.as_str();
            for (type_name, entity_type) in ENTITY_TYPE_NAMES {
                if let Ok(matches) = self
                    .graph
                    .find_by_property(type_name, "name", &json!(candidate))
                    .await
                {
                    for entity_id in matches {
                        if entity_id.entity_type == *entity_type && !found.contains(&entity_id) {
                            found.push(entity_id);
                        }
                    }
                }
            }
        }
        found
    }
}

fn rule_based_kind(question: &str) -> Option<(IntentKind, f64)> {
    let q = question.to_lowercase();
    // A second question clause chained with "and" (e.g. "who wrote X and
    // what constraints did it define?") outranks any single-keyword match
    // below — it needs all three brains, not just the one its first clause
    // would suggest (§8 scenario 4).
    let second_clause =
        [" and who", " and what", " and how", " and when", " and why"].iter().any(|p| q.contains(p));
    if second_clause {
        Some((IntentKind::Hybrid, 0.7))
    } else if q.contains("who wrote") || q.contains("authored by") || q.contains("who authored") {
        Some((IntentKind::AuthorAttribution, 0.9))
    } else if q.contains("timeline") || q.contains("sequence") || q.contains("when did") || q.contains("before")
        || q.contains("after")
    {
        Some((IntentKind::Timeline, 0.85))
    } else if q.contains("because") || q.contains("led to") || q.contains("caused") || q.contains("why") {
        Some((IntentKind::Causal, 0.85))
    } else if q.contains("related to") || q.contains("connected") || q.contains("depends") || q.contains("relation") {
        Some((IntentKind::Relational, 0.8))
    } else if q.contains("how many") || q.contains("average") || q.contains("count") || q.contains("total") {
        Some((IntentKind::Structured, 0.85))
    } else {
        Some((IntentKind::Semantic, 0.65))
    }
}

fn from_coarse_intent(coarse: CoarseIntent) -> IntentKind {
    match coarse {
        CoarseIntent::Factual => IntentKind::Semantic,
        CoarseIntent::Relational => IntentKind::Relational,
        CoarseIntent::Aggregate => IntentKind::Structured,
        CoarseIntent::Exploratory => IntentKind::Semantic,
    }
}

fn target_brains_for(kind: IntentKind) -> Vec<BrainKind> {
    match kind {
        IntentKind::Semantic => vec![BrainKind::Vector],
        IntentKind::Structured => vec![BrainKind::Analytical],
        IntentKind::Relational | IntentKind::AuthorAttribution | IntentKind::Timeline | IntentKind::Causal => {
            vec![BrainKind::Graph, BrainKind::Vector]
        }
        IntentKind::Hybrid => vec![BrainKind::Vector, BrainKind::Analytical, BrainKind::Graph],
    }
}

fn brain_kind_for_priority(priority: PriorityBrain) -> Option<BrainKind> {
    match priority {
        PriorityBrain::Vector => Some(BrainKind::Vector),
        PriorityBrain::Analytical => Some(BrainKind::Analytical),
        PriorityBrain::Graph => Some(BrainKind::Graph),
        PriorityBrain::Auto => None,
    }
}

fn synthesis_mode_for(kind: IntentKind) -> SynthesisMode {
    match kind {
        IntentKind::Structured => SynthesisMode::Tabular,
        IntentKind::Semantic => SynthesisMode::Extractive,
        _ => SynthesisMode::Abstractive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brains::{InMemoryGraphBrain, InMemoryLlmBrain};
    use crate::packet::{Entity, EntityType};

    fn analyzer() -> QueryAnalyzer {
        QueryAnalyzer::new(Arc::new(InMemoryLlmBrain::new()), Arc::new(InMemoryGraphBrain::new()))
    }

    #[tokio::test]
    async fn author_attribution_questions_route_to_graph_and_vector() {
        let intent = analyzer().analyze("Who wrote the thermal analysis?", None).await.unwrap();
        assert_eq!(intent.kind, IntentKind::AuthorAttribution);
        assert_eq!(intent.target_brains, vec![BrainKind::Graph, BrainKind::Vector]);
        assert_eq!(intent.synthesis_mode, SynthesisMode::Abstractive);
    }

    #[tokio::test]
    async fn structured_questions_select_tabular_synthesis() {
        let intent = analyzer().analyze("How many incidents happened last month?", None).await.unwrap();
        assert_eq!(intent.kind, IntentKind::Structured);
        assert_eq!(intent.synthesis_mode, SynthesisMode::Tabular);
    }

    #[tokio::test]
    async fn hybrid_questions_target_all_three_brains() {
        let intent = analyzer()
            .analyze("Who wrote the thermal analysis and what constraints did it define?", None)
            .await
            .unwrap();
        assert_eq!(intent.kind, IntentKind::Hybrid);
        assert_eq!(intent.target_brains.len(), 3);
    }

    #[tokio::test]
    async fn extracted_entities_resolve_exact_graph_name_matches() {
        let graph = Arc::new(InMemoryGraphBrain::new());
        graph
            .upsert_entities(&[Entity {
                entity_type: EntityType::Person,
                name: "Sarah Chen".to_string(),
                properties: Default::default(),
                confidence: 1.0,
            }])
            .await
            .unwrap();
        let analyzer = QueryAnalyzer::new(Arc::new(InMemoryLlmBrain::new()), graph);
        let intent = analyzer.analyze("What did Sarah Chen write?", None).await.unwrap();
        assert!(intent
            .extracted_entities
            .iter()
            .any(|e| e.name == "Sarah Chen" && e.entity_type == EntityType::Person));
    }

    #[tokio::test]
    async fn priority_override_forces_the_named_brain_first() {
        let intent = analyzer()
            .analyze("Tell me about the project.", Some(PriorityBrain::Graph))
            .await
            .unwrap();
        assert_eq!(intent.target_brains.first(), Some(&BrainKind::Graph));
    }
}
