//! LlmBrain adapter (§4.2, §4.5).

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::BrainError;

use super::Health;

/// A piece of evidence gathered from another brain, handed to the LLM for
/// synthesis (§4.6 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub source: EvidenceSource,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    Vector,
    Analytical,
    Graph,
}

/// How the caller wants the synthesized answer shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStyle {
    #[default]
    Concise,
    Detailed,
    BulletPoints,
}

/// A synthesized answer, §4.6's final output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<EvidenceSource>,
    /// True when synthesis fell back to an extractive (non-LLM) answer
    /// because the LLM brain was unavailable (§4.6 degraded mode).
    pub extractive_fallback: bool,
}

/// Coarse intent classes used to route a question to the brains most
/// likely to answer it (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Factual,
    Relational,
    Aggregate,
    Exploratory,
}

#[async_trait]
pub trait LlmBrain: Send + Sync {
    async fn synthesize(
        &self,
        question: &str,
        evidence: &[EvidenceItem],
        style: SynthesisStyle,
    ) -> Result<Answer, BrainError>;

    async fn classify_intent(&self, question: &str) -> Result<QueryIntent, BrainError>;

    async fn health(&self) -> Health;
}

/// In-memory LlmBrain standing in for the externally owned LLM service
/// (§1 Non-goals). Synthesis is extractive — it stitches together the
/// highest-scored evidence rather than generating prose — which keeps the
/// fallback path and the "real" path structurally identical for testing.
pub struct InMemoryLlmBrain {
    fault: Mutex<Option<BrainError>>,
}

impl Default for InMemoryLlmBrain {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLlmBrain {
    pub fn new() -> Self {
        Self {
            fault: Mutex::new(None),
        }
    }

    pub fn inject_fault(&self, fault: Option<BrainError>) {
        *self.fault.lock() = fault;
    }

    fn take_fault(&self) -> Option<BrainError> {
        self.fault.lock().clone()
    }
}

/// Stitch the top-scored evidence items into an answer without an LLM.
/// Used both by `InMemoryLlmBrain::synthesize` and the orchestrator's
/// degraded-mode fallback when every LLM brain is unhealthy (§4.6).
pub fn extractive_synthesis(evidence: &[EvidenceItem], style: SynthesisStyle) -> Answer {
    let mut sorted: Vec<&EvidenceItem> = evidence.iter().collect();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let top_n = match style {
        SynthesisStyle::Concise => 1,
        SynthesisStyle::Detailed => sorted.len(),
        SynthesisStyle::BulletPoints => sorted.len().min(5),
    };

    let picked: Vec<&&EvidenceItem> = sorted.iter().take(top_n).collect();
    let text = match style {
        SynthesisStyle::BulletPoints => picked
            .iter()
            .map(|item| format!("- {}", item.text))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => picked
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    };

    Answer {
        text,
        citations: picked.iter().map(|item| item.source).collect(),
        extractive_fallback: true,
    }
}

fn rule_based_intent(question: &str) -> QueryIntent {
    let q = question.to_lowercase();
    if q.contains("how many") || q.contains("count") || q.contains("total") || q.contains("average") {
        QueryIntent::Aggregate
    } else if q.contains("who") || q.contains("connected") || q.contains("relate") || q.contains("depend") {
        QueryIntent::Relational
    } else if q.contains("what") || q.contains("when") || q.contains("where") {
        QueryIntent::Factual
    } else {
        QueryIntent::Exploratory
    }
}

#[async_trait]
impl LlmBrain for InMemoryLlmBrain {
    async fn synthesize(
        &self,
        _question: &str,
        evidence: &[EvidenceItem],
        style: SynthesisStyle,
    ) -> Result<Answer, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let mut answer = extractive_synthesis(evidence, style);
        // The reference brain has no generative model behind it, so its
        // "synthesis" is the same extractive stitch as the fallback path;
        // report it as non-fallback since it IS this brain's real answer.
        answer.extractive_fallback = false;
        Ok(answer)
    }

    async fn classify_intent(&self, question: &str) -> Result<QueryIntent, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        Ok(rule_based_intent(question))
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

    fn item(source: EvidenceSource, text: &str, score: f64) -> EvidenceItem {
        EvidenceItem {
            source,
            text: text.to_string(),
            score,
        }
    }

    #[tokio::test]
    async fn concise_style_picks_only_the_top_item() {
        let brain = InMemoryLlmBrain::new();
        let evidence = vec![
            item(EvidenceSource::Vector, "low relevance", 0.2),
            item(EvidenceSource::Graph, "high relevance", 0.9),
        ];
        let answer = brain
            .synthesize("question", &evidence, SynthesisStyle::Concise)
            .await
            .unwrap();
        assert_eq!(answer.text, "high relevance");
        assert!(!answer.extractive_fallback);
    }

    #[tokio::test]
    async fn fallback_marks_extractive_fallback_true() {
        let evidence = vec![item(EvidenceSource::Vector, "only evidence", 1.0)];
        let answer = extractive_synthesis(&evidence, SynthesisStyle::Concise);
        assert!(answer.extractive_fallback);
    }

    #[tokio::test]
    async fn classify_intent_detects_aggregate_questions() {
        let brain = InMemoryLlmBrain::new();
        let intent = brain.classify_intent("How many incidents happened last quarter?").await.unwrap();
        assert_eq!(intent, QueryIntent::Aggregate);
    }
}
