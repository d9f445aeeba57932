//! The Knowledge Packet data model (§3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of source content types (§3, `source.content_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Document,
    Spreadsheet,
    Codebase,
    Email,
    Chat,
    ApiDocs,
    Presentation,
    Image,
    Video,
    Audio,
    Database,
    Custom,
}

/// Closed set of data-classification levels (§3, `metadata.classification`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    Internal,
    Confidential,
    Restricted,
}

/// Closed set of graph entity types (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EntityType {
    Person,
    Document,
    TechnicalConcept,
    System,
    Component,
    Decision,
    Meeting,
    Project,
    Team,
    Role,
    Process,
    Constraint,
    Risk,
    Action,
}

/// Closed set of graph relationship kinds (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    HasExpertise,
    HasRole,
    MemberOf,
    Made,
    Attended,
    PartOf,
    InterfacesWith,
    ConstrainedBy,
    Affects,
    ValidatedBy,
    Produced,
    MitigatedBy,
    ResultedIn,
    Authored,
    Mentions,
    References,
    Discusses,
    DependsOn,
}

/// Which brain a packet's author believes should take priority (§3
/// `processing_hints.priority_brain`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBrain {
    Vector,
    Analytical,
    Graph,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub mcp_server_name: String,
    pub server_version: String,
    pub original_location: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub extraction_method: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub contributors: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub classification: Option<Classification>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    #[serde(default)]
    pub chunk_metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorData {
    pub chunks: Vec<Chunk>,
    pub embedding_model: String,
    #[serde(default)]
    pub chunk_strategy: Option<String>,
    /// Must lie in [50, 8192] when present (§3).
    #[serde(default)]
    pub chunk_size: Option<u32>,
    /// Must lie in [0, 500] when present (§3).
    #[serde(default)]
    pub chunk_overlap: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableData {
    pub table_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub column_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticalData {
    #[serde(default)]
    pub structured_fields: HashMap<String, Value>,
    #[serde(default)]
    pub table_data: Vec<TableData>,
    #[serde(default)]
    pub time_series: Vec<TimeSeriesPoint>,
    #[serde(default)]
    pub statistics: HashMap<String, Value>,
}

/// A reference to an entity by its natural key (§3: identity is `(type, name)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl Entity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            entity_type: self.entity_type,
            name: self.name.clone(),
        }
    }
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_ref: EntityRef,
    pub relationship: RelationshipKind,
    pub target_ref: EntityRef,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Carried through opaque; supplements the distilled spec (§3 of
    /// SPEC_FULL.md) from the original schema's `graph_data.context`.
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub vector_data: Option<VectorData>,
    #[serde(default)]
    pub analytical_data: Option<AnalyticalData>,
    #[serde(default)]
    pub graph_data: Option<GraphData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingHints {
    #[serde(default)]
    pub priority_brain: Option<PriorityBrain>,
    #[serde(default)]
    pub semantic_weight: Option<f64>,
    #[serde(default)]
    pub relationship_importance: Option<f64>,
    #[serde(default)]
    pub requires_expert_routing: Option<bool>,
    #[serde(default)]
    pub content_classification: Option<String>,
    #[serde(default)]
    pub indexing_priority: Option<IndexingPriority>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingError {
    pub error_type: String,
    pub error_message: String,
    pub severity: ErrorSeverity,
    pub component: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    #[serde(default)]
    pub extraction_confidence: Option<f64>,
    #[serde(default)]
    pub content_completeness: Option<f64>,
    #[serde(default)]
    pub relationship_accuracy: Option<f64>,
    #[serde(default)]
    pub text_quality_score: Option<f64>,
    #[serde(default)]
    pub metadata_richness: Option<f64>,
    #[serde(default)]
    pub processing_errors: Vec<ProcessingError>,
}

/// A data-lineage step, from the original schema's `versioning.data_lineage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageStep {
    pub source_system: String,
    pub transformation: String,
    pub timestamp: DateTime<Utc>,
}

/// Supplemental to the distilled spec: carried from
/// `nancy-services/schemas/knowledge_packet.py`'s `versioning` object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Versioning {
    #[serde(default)]
    pub packet_version: Option<u32>,
    #[serde(default)]
    pub previous_packet_id: Option<String>,
    #[serde(default)]
    pub change_summary: Option<String>,
    #[serde(default)]
    pub data_lineage: Vec<LineageStep>,
}

/// The canonical unit of ingestion (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgePacket {
    pub packet_version: String,
    pub packet_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub metadata: Metadata,
    pub content: Content,
    #[serde(default)]
    pub processing_hints: Option<ProcessingHints>,
    #[serde(default)]
    pub quality_metrics: Option<QualityMetrics>,
    #[serde(default)]
    pub versioning: Option<Versioning>,
}

impl KnowledgePacket {
    pub fn has_vector_data(&self) -> bool {
        self.content
            .vector_data
            .as_ref()
            .is_some_and(|v| !v.chunks.is_empty())
    }

    pub fn has_analytical_data(&self) -> bool {
        self.content.analytical_data.as_ref().is_some_and(|a| {
            !a.structured_fields.is_empty() || !a.table_data.is_empty() || !a.time_series.is_empty()
        })
    }

    pub fn has_graph_data(&self) -> bool {
        self.content
            .graph_data
            .as_ref()
            .is_some_and(|g| !g.entities.is_empty() || !g.relationships.is_empty())
    }

    /// Auto-detected priority brain when the packet supplies none (mirrors
    /// `NancyKnowledgePacket.get_priority_brain` in the original Python).
    pub fn priority_brain(&self) -> PriorityBrain {
        if let Some(hints) = &self.processing_hints {
            if let Some(p) = hints.priority_brain {
                return p;
            }
        }
        if self.has_graph_data() && self.has_analytical_data() {
            PriorityBrain::Graph
        } else if self.has_analytical_data() {
            PriorityBrain::Analytical
        } else if self.has_vector_data() {
            PriorityBrain::Vector
        } else {
            PriorityBrain::Auto
        }
    }
}
