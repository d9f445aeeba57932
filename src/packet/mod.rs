//! Knowledge Packet data model, canonicalization, and validation (C1, §3–§4.1).

mod canonical;
mod model;
mod validator;

pub use canonical::{canonical_serialize, content_hash};
pub use model::{
    AnalyticalData, Chunk, Classification, Content, ContentType, Entity, EntityRef, EntityType,
    ErrorSeverity, GraphData, IndexingPriority, KnowledgePacket, LineageStep, Metadata,
    PriorityBrain, ProcessingError, ProcessingHints, QualityMetrics, Relationship,
    RelationshipKind, Source, TableData, TimeSeriesPoint, VectorData, Versioning,
};
pub use validator::{validate, validation_errors, ValidatedPacket, ValidationError};
