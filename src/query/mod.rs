//! Query Analyzer (C5, §4.5) and Query Orchestrator (C6, §4.6).

mod analyzer;
mod orchestrator;

pub use analyzer::{IntentKind, QueryAnalyzer, QueryIntent, SynthesisMode};
pub use orchestrator::{
    Citation, EvidenceRef, MergedEvidence, QueryOptions, QueryOrchestrator, QueryResponse,
    SynthesisOutcome,
};
