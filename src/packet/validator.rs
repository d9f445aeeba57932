//! Knowledge Packet Validator (C1, §4.1).

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;

use super::canonical::content_hash;
use super::model::KnowledgePacket;

/// A packet that has passed schema validation and hash verification.
#[derive(Debug, Clone)]
pub struct ValidatedPacket(pub KnowledgePacket);

impl ValidatedPacket {
    pub fn into_inner(self) -> KnowledgePacket {
        self.0
    }
}

impl std::ops::Deref for ValidatedPacket {
    type Target = KnowledgePacket;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

const CONTENT_TYPES: &[&str] = &[
    "document",
    "spreadsheet",
    "codebase",
    "email",
    "chat",
    "api_docs",
    "presentation",
    "image",
    "video",
    "audio",
    "database",
    "custom",
];
const CLASSIFICATIONS: &[&str] = &["public", "internal", "confidential", "restricted"];
const ENTITY_TYPES: &[&str] = &[
    "Person",
    "Document",
    "TechnicalConcept",
    "System",
    "Component",
    "Decision",
    "Meeting",
    "Project",
    "Team",
    "Role",
    "Process",
    "Constraint",
    "Risk",
    "Action",
];
const RELATIONSHIP_KINDS: &[&str] = &[
    "HAS_EXPERTISE",
    "HAS_ROLE",
    "MEMBER_OF",
    "MADE",
    "ATTENDED",
    "PART_OF",
    "INTERFACES_WITH",
    "CONSTRAINED_BY",
    "AFFECTS",
    "VALIDATED_BY",
    "PRODUCED",
    "MITIGATED_BY",
    "RESULTED_IN",
    "AUTHORED",
    "MENTIONS",
    "REFERENCES",
    "DISCUSSES",
    "DEPENDS_ON",
];
const PRIORITY_BRAINS: &[&str] = &["vector", "analytical", "graph", "auto"];

/// A single validation failure (§4.1: every violation carries a
/// JSON-Pointer-like path).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field at {0}")]
    MissingField(String),

    #[error("field at {path} has the wrong type, expected {expected}")]
    WrongType { path: String, expected: String },

    #[error("unknown value '{value}' for enumerated field at {path}")]
    UnknownEnumValue { path: String, value: String },

    #[error("value at {path} is out of range: {message}")]
    OutOfRange { path: String, message: String },

    #[error("computed content hash does not match packet_id")]
    HashMismatch { expected: String, computed: String },

    #[error("content must contain at least one of vector_data, analytical_data, graph_data")]
    EmptyContent,

    #[error("duplicate chunk_id '{0}' within content.vector_data.chunks")]
    DuplicateChunkId(String),

    #[error("packet_id at {0} is not 64 hex characters")]
    InvalidPacketId(String),
}

impl ValidationError {
    pub fn path(&self) -> String {
        match self {
            ValidationError::MissingField(p) => p.clone(),
            ValidationError::WrongType { path, .. } => path.clone(),
            ValidationError::UnknownEnumValue { path, .. } => path.clone(),
            ValidationError::OutOfRange { path, .. } => path.clone(),
            ValidationError::HashMismatch { .. } => "/packet_id".to_string(),
            ValidationError::EmptyContent => "/content".to_string(),
            ValidationError::DuplicateChunkId(_) => "/content/vector_data/chunks".to_string(),
            ValidationError::InvalidPacketId(p) => p.clone(),
        }
    }
}

fn get<'a>(v: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = v;
    for seg in path.trim_start_matches('/').split('/') {
        if seg.is_empty() {
            continue;
        }
        cur = cur.get(seg)?;
    }
    Some(cur)
}

fn check_enum(v: &Value, path: &str, allowed: &[&str], out: &mut Vec<ValidationError>) {
    if let Some(val) = get(v, path) {
        match val.as_str() {
            Some(s) if allowed.contains(&s) => {}
            Some(s) => out.push(ValidationError::UnknownEnumValue {
                path: path.to_string(),
                value: s.to_string(),
            }),
            None => out.push(ValidationError::WrongType {
                path: path.to_string(),
                expected: "string".to_string(),
            }),
        }
    }
}

/// Object-relative field lookup (unlike [`get`], `field` has no leading
/// slash and is looked up directly under `obj`).
fn e_get<'a>(obj: &'a Value, field: &str) -> Option<&'a Value> {
    obj.get(field)
}

fn check_enum_at(
    obj: &Value,
    field: &str,
    allowed: &[&str],
    base: &str,
    out: &mut Vec<ValidationError>,
) {
    if let Some(val) = e_get(obj, field) {
        match val.as_str() {
            Some(s) if allowed.contains(&s) => {}
            Some(s) => out.push(ValidationError::UnknownEnumValue {
                path: format!("{base}/{field}"),
                value: s.to_string(),
            }),
            None => out.push(ValidationError::WrongType {
                path: format!("{base}/{field}"),
                expected: "string".to_string(),
            }),
        }
    }
}

fn check_confidence_at(obj: &Value, field: &str, base: &str, out: &mut Vec<ValidationError>) {
    if let Some(val) = e_get(obj, field) {
        if let Some(n) = val.as_f64() {
            if !(0.0..=1.0).contains(&n) {
                out.push(ValidationError::OutOfRange {
                    path: format!("{base}/{field}"),
                    message: "confidence must be within [0, 1]".to_string(),
                });
            }
        } else {
            out.push(ValidationError::WrongType {
                path: format!("{base}/{field}"),
                expected: "number".to_string(),
            });
        }
    }
}

/// Report every violation in `raw` (non-raising variant, §4.1).
pub fn validation_errors(raw: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for required in ["/packet_version", "/packet_id", "/timestamp", "/source", "/metadata", "/content"] {
        if get(raw, required).is_none() {
            errors.push(ValidationError::MissingField(required.to_string()));
        }
    }
    if get(raw, "/metadata/title").is_none() {
        errors.push(ValidationError::MissingField("/metadata/title".to_string()));
    }

    if let Some(packet_id) = get(raw, "/packet_id").and_then(Value::as_str) {
        if packet_id.len() != 64 || !packet_id.chars().all(|c| c.is_ascii_hexdigit()) {
            errors.push(ValidationError::InvalidPacketId("/packet_id".to_string()));
        }
    }

    check_enum(raw, "/source/content_type", CONTENT_TYPES, &mut errors);
    check_enum(raw, "/metadata/classification", CLASSIFICATIONS, &mut errors);
    check_enum(
        raw,
        "/processing_hints/priority_brain",
        PRIORITY_BRAINS,
        &mut errors,
    );

    if let Some(chunks) = get(raw, "/content/vector_data/chunks").and_then(Value::as_array) {
        let mut seen = HashSet::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.get("chunk_id").is_none() {
                errors.push(ValidationError::MissingField(format!(
                    "/content/vector_data/chunks/{i}/chunk_id"
                )));
                continue;
            }
            if let Some(id) = chunk.get("chunk_id").and_then(Value::as_str) {
                if !seen.insert(id.to_string()) {
                    errors.push(ValidationError::DuplicateChunkId(id.to_string()));
                }
            }
            if chunk.get("text").is_none() {
                errors.push(ValidationError::MissingField(format!(
                    "/content/vector_data/chunks/{i}/text"
                )));
            }
        }
    }
    if let Some(size) = get(raw, "/content/vector_data/chunk_size").and_then(Value::as_u64) {
        if !(50..=8192).contains(&size) {
            errors.push(ValidationError::OutOfRange {
                path: "/content/vector_data/chunk_size".to_string(),
                message: "chunk_size must be within [50, 8192]".to_string(),
            });
        }
    }
    if let Some(overlap) = get(raw, "/content/vector_data/chunk_overlap").and_then(Value::as_u64) {
        if overlap > 500 {
            errors.push(ValidationError::OutOfRange {
                path: "/content/vector_data/chunk_overlap".to_string(),
                message: "chunk_overlap must be within [0, 500]".to_string(),
            });
        }
    }

    if let Some(entities) = get(raw, "/content/graph_data/entities").and_then(Value::as_array) {
        for (i, e) in entities.iter().enumerate() {
            let base = format!("/content/graph_data/entities/{i}");
            check_enum_at(e, "type", ENTITY_TYPES, &base, &mut errors);
            check_confidence_at(e, "confidence", &base, &mut errors);
        }
    }
    if let Some(rels) = get(raw, "/content/graph_data/relationships").and_then(Value::as_array) {
        for (i, r) in rels.iter().enumerate() {
            let base = format!("/content/graph_data/relationships/{i}");
            check_enum_at(r, "relationship", RELATIONSHIP_KINDS, &base, &mut errors);
            check_confidence_at(r, "confidence", &base, &mut errors);
            for side in ["source_ref", "target_ref"] {
                if e_get(r, side).is_none() {
                    errors.push(ValidationError::MissingField(format!("{base}/{side}")));
                }
            }
        }
    }

    let has_vector = get(raw, "/content/vector_data")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    let has_analytical = get(raw, "/content/analytical_data")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    let has_graph = get(raw, "/content/graph_data")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    if !has_vector && !has_analytical && !has_graph {
        errors.push(ValidationError::EmptyContent);
    }

    // Hash verification runs last so shape errors are reported first.
    if errors.is_empty() {
        if let (Some(packet_id), Some(content)) = (
            get(raw, "/packet_id").and_then(Value::as_str),
            get(raw, "/content"),
        ) {
            let computed = content_hash(content);
            if computed != packet_id {
                errors.push(ValidationError::HashMismatch {
                    expected: packet_id.to_string(),
                    computed,
                });
            }
        }
    }

    errors
}

/// Validate `raw`, returning a [`ValidatedPacket`] or the first violation
/// encountered (§4.1 `Validate`).
pub fn validate(raw: &Value) -> Result<ValidatedPacket, ValidationError> {
    let mut errors = validation_errors(raw);
    if let Some(first) = errors.drain(..).next() {
        return Err(first);
    }
    let packet: KnowledgePacket = serde_json::from_value(raw.clone()).map_err(|e| {
        ValidationError::WrongType {
            path: "/".to_string(),
            expected: e.to_string(),
        }
    })?;
    Ok(ValidatedPacket(packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_packet() -> Value {
        let content = json!({
            "vector_data": {
                "chunks": [{"chunk_id": "c1", "text": "Thermal constraints: max 85C"}],
                "embedding_model": "text-embedding-3-small"
            }
        });
        let packet_id = content_hash(&content);
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

    #[test]
    fn accepts_a_well_formed_packet() {
        let v = valid_packet();
        assert!(validate(&v).is_ok());
    }

    #[test]
    fn rejects_tampered_hash() {
        let mut v = valid_packet();
        v["packet_id"] = json!("f".repeat(64));
        let err = validate(&v).unwrap_err();
        assert!(matches!(err, ValidationError::HashMismatch { .. }));
    }

    #[test]
    fn rejects_unknown_content_type() {
        let mut v = valid_packet();
        v["source"]["content_type"] = json!("podcast");
        let err = validate(&v).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownEnumValue { .. }));
    }

    #[test]
    fn rejects_empty_content() {
        let mut v = valid_packet();
        v["content"] = json!({});
        let packet_id = content_hash(&v["content"]);
        v["packet_id"] = json!(packet_id);
        let err = validate(&v).unwrap_err();
        assert_eq!(err, ValidationError::EmptyContent);
    }

    #[test]
    fn rejects_duplicate_chunk_ids() {
        let mut v = valid_packet();
        v["content"]["vector_data"]["chunks"] = json!([
            {"chunk_id": "dup", "text": "a"},
            {"chunk_id": "dup", "text": "b"}
        ]);
        let packet_id = content_hash(&v["content"]);
        v["packet_id"] = json!(packet_id);
        let errors = validation_errors(&v);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateChunkId(_))));
    }

    #[test]
    fn reports_every_violation_not_just_the_first() {
        let mut v = valid_packet();
        v["source"]["content_type"] = json!("podcast");
        v["content"]["vector_data"]["chunks"] = json!([
            {"chunk_id": "dup", "text": "a"},
            {"chunk_id": "dup", "text": "b"}
        ]);
        let errors = validation_errors(&v);
        assert!(errors.len() >= 2);
    }
}
