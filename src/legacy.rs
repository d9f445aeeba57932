//! Legacy upload conversion (§4.7 "legacy": "accepts legacy file uploads,
//! which a built-in minimal processor converts into Knowledge Packets
//! internally").

use chrono::Utc;
use serde_json::Value;

use crate::packet::{content_hash, Chunk, Content, ContentType, KnowledgePacket, Metadata, Source, VectorData};

/// A legacy single-file upload (§6 `POST /ingest/legacy`: multipart `file`,
/// `author`, optional metadata fields).
pub struct LegacyUpload {
    pub file_name: String,
    pub text: String,
    pub author: Option<String>,
    pub tags: Vec<String>,
}

/// Wrap a legacy upload's text as a single vector chunk and compute its
/// content hash, producing a Knowledge Packet indistinguishable from one
/// submitted natively.
pub fn convert(upload: LegacyUpload) -> KnowledgePacket {
    let content = Content {
        vector_data: Some(VectorData {
            chunks: vec![Chunk {
                chunk_id: format!("{}-0", upload.file_name),
                text: upload.text,
                chunk_metadata: Default::default(),
            }],
            embedding_model: "legacy-processor".to_string(),
            chunk_strategy: Some("whole-file".to_string()),
            chunk_size: None,
            chunk_overlap: None,
        }),
        analytical_data: None,
        graph_data: None,
    };

    let content_value: Value = serde_json::to_value(&content).expect("content always serializes");
    let packet_id = content_hash(&content_value);

    KnowledgePacket {
        packet_version: "1.0.0".to_string(),
        packet_id,
        timestamp: Utc::now(),
        source: Source {
            mcp_server_name: "legacy-upload".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            original_location: upload.file_name.clone(),
            content_type: ContentType::Document,
            extraction_method: Some("legacy-passthrough".to_string()),
        },
        metadata: Metadata {
            title: upload.file_name,
            author: upload.author,
            tags: upload.tags,
            ..Default::default()
        },
        content,
        processing_hints: None,
        quality_metrics: None,
        versioning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converted_packet_id_matches_the_content_hash() {
        let upload = LegacyUpload {
            file_name: "notes.txt".to_string(),
            text: "hello world".to_string(),
            author: Some("jane".to_string()),
            tags: vec!["draft".to_string()],
        };
        let packet = convert(upload);
        let content_value = serde_json::to_value(&packet.content).unwrap();
        assert_eq!(packet.packet_id, content_hash(&content_value));
        assert_eq!(packet.metadata.author.as_deref(), Some("jane"));
    }
}
