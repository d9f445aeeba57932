//! Brain Adapters (C2, §4.2): four narrow interfaces over backend stores.
//!
//! Each adapter is polymorphic over backend choice (a trait); the in-memory
//! implementations shipped here make the Router and Orchestrator runnable
//! and testable without a live vector/graph/analytical/LLM engine, mirroring
//! how the teacher workspace ships `InMemoryVectorStore`/`MockEmbeddings`
//! alongside its real `dashflow-qdrant`/`dashflow-neo4j` backends.

mod analytical;
mod graph;
mod llm;
mod vector;

pub use analytical::{
    upsert_analytical_data, AnalyticalBrain, InMemoryAnalyticalBrain, QueryFilter, ResultRow,
    ResultSet, StructuredQuery,
};
pub use graph::{GraphBrain, InMemoryGraphBrain, Path, Subgraph};
pub use llm::{
    extractive_synthesis, Answer, EvidenceItem, EvidenceSource, InMemoryLlmBrain, LlmBrain,
    QueryIntent, SynthesisStyle,
};
pub use vector::{InMemoryVectorBrain, ScoredChunk, SearchFilter, VectorBrain};

use serde::{Deserialize, Serialize};

use crate::packet::EntityRef;

/// Identity of a graph entity is `(type, name)` (§4.2).
pub type EntityId = EntityRef;

/// Acknowledgement of a successful adapter write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// `Health() -> {status, latency_p50, last_error}` (§4.2, shared by all adapters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: HealthStatus,
    pub latency_p50_ms: f64,
    pub last_error: Option<String>,
}

impl Health {
    pub fn healthy() -> Self {
        Health {
            status: HealthStatus::Healthy,
            latency_p50_ms: 0.0,
            last_error: None,
        }
    }

    pub fn unhealthy(err: impl Into<String>) -> Self {
        Health {
            status: HealthStatus::Unhealthy,
            latency_p50_ms: 0.0,
            last_error: Some(err.into()),
        }
    }
}

/// One of the four brains, used to label outcomes and route sub-queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrainKind {
    Vector,
    Analytical,
    Graph,
    Llm,
}

impl std::fmt::Display for BrainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BrainKind::Vector => "vector",
            BrainKind::Analytical => "analytical",
            BrainKind::Graph => "graph",
            BrainKind::Llm => "llm",
        };
        write!(f, "{s}")
    }
}
