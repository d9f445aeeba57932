//! Crate-wide error taxonomy (§7 of the orchestration spec).
//!
//! Component-local error enums convert into [`NancyError`] via `From`, so
//! call sites can propagate with `?` and the outer caller still gets a
//! single, renderable error kind.

use thiserror::Error;

use crate::packet::ValidationError;

/// A single violation found while validating a packet, carrying a
/// JSON-Pointer-style path to the offending field.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Errors raised by a brain adapter (§4.2).
#[derive(Debug, Error, Clone)]
pub enum BrainError {
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("backend write failed: {0}")]
    BackendWrite(String),
    #[error("backend read failed: {0}")]
    BackendRead(String),
    #[error("llm backend unavailable: {0}")]
    ModelUnavailable(String),
    #[error("llm context window exceeded: {0} tokens over budget")]
    ContextOverflow(usize),
    #[error("llm declined to answer: {0}")]
    SafetyRefusal(String),
}

impl BrainError {
    /// Whether the fault is transient and worth retrying (§4.3 step 4).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrainError::EmbeddingUnavailable(_)
                | BrainError::BackendWrite(_)
                | BrainError::BackendRead(_)
                | BrainError::ModelUnavailable(_)
        )
    }
}

/// Errors raised by the MCP Host (§4.4).
#[derive(Debug, Error, Clone)]
pub enum McpError {
    #[error("failed to spawn mcp server '{name}': {message}")]
    Spawn { name: String, message: String },
    #[error("rpc error calling '{method}' on '{server}': {message}")]
    Rpc {
        server: String,
        method: String,
        message: String,
    },
    #[error("mcp server '{0}' is unhealthy")]
    ServerUnhealthy(String),
    #[error("mcp server '{0}' is unavailable (disabled after repeated crashes)")]
    ServerUnavailable(String),
    #[error("no mcp server registered for content type '{0}'")]
    NoServerForContentType(String),
    #[error("timed out waiting for mcp server '{name}' after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },
    #[error("mcp protocol error: {0}")]
    Protocol(String),
}

/// Top-level error taxonomy surfaced to callers, matching the outcomes named
/// in §7's error table.
#[derive(Debug, Error, Clone)]
pub enum NancyError {
    #[error("packet failed schema validation")]
    Validation(Vec<ValidationIssue>),

    #[error("packet_id does not match sha256(canonical(content))")]
    HashMismatch { expected: String, computed: String },

    #[error("unknown value '{value}' for enumerated field at {path}")]
    UnknownEnumValue { path: String, value: String },

    #[error(transparent)]
    Brain(#[from] BrainError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("sub-query timed out")]
    Timeout,

    #[error("query cancelled by caller")]
    Cancelled,

    #[error("operation rejected: active mode is '{active_mode}'")]
    ModeRejection { active_mode: String },

    #[error("configuration invalid: {0}")]
    Config(String),

    #[error("no healthy brains available at startup")]
    NoHealthyBrains,
}

impl From<ValidationError> for NancyError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::HashMismatch { expected, computed } => {
                NancyError::HashMismatch { expected, computed }
            }
            ValidationError::UnknownEnumValue { path, value } => {
                NancyError::UnknownEnumValue { path, value }
            }
            other => NancyError::Validation(vec![ValidationIssue {
                path: other.path(),
                message: other.to_string(),
            }]),
        }
    }
}

/// The user-visible failure shape from §7: `{outcome, error_kind, message, path?, retry_after?}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorResponse {
    pub outcome: &'static str,
    pub error_kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl From<&NancyError> for ErrorResponse {
    fn from(e: &NancyError) -> Self {
        let error_kind = match e {
            NancyError::Validation(_) => "ValidationError",
            NancyError::HashMismatch { .. } => "HashMismatch",
            NancyError::UnknownEnumValue { .. } => "ValidationError",
            NancyError::Brain(inner) => match inner {
                BrainError::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
                BrainError::BackendWrite(_) => "BackendWrite",
                BrainError::BackendRead(_) => "BackendRead",
                BrainError::ModelUnavailable(_) => "ModelUnavailable",
                BrainError::ContextOverflow(_) => "ContextOverflow",
                BrainError::SafetyRefusal(_) => "SafetyRefusal",
            },
            NancyError::Mcp(inner) => match inner {
                McpError::Spawn { .. } => "RpcError",
                McpError::Rpc { .. } => "RpcError",
                McpError::ServerUnhealthy(_) => "ServerUnhealthy",
                McpError::ServerUnavailable(_) => "ServerUnavailable",
                McpError::NoServerForContentType(_) => "ServerUnavailable",
                McpError::Timeout { .. } => "Timeout",
                McpError::Protocol(_) => "RpcError",
            },
            NancyError::Timeout => "Timeout",
            NancyError::Cancelled => "Cancelled",
            NancyError::ModeRejection { .. } => "ModeRejection",
            NancyError::Config(_) => "ConfigError",
            NancyError::NoHealthyBrains => "NoHealthyBrains",
        };
        let path = match e {
            NancyError::Validation(issues) => issues.first().map(|i| i.path.clone()),
            _ => None,
        };
        let retry_after_ms = match e {
            NancyError::Brain(inner) if inner.is_transient() => Some(100),
            NancyError::Mcp(McpError::Timeout { .. }) => Some(1000),
            _ => None,
        };
        ErrorResponse {
            outcome: "failed",
            error_kind: error_kind.to_string(),
            message: e.to_string(),
            path,
            retry_after_ms,
        }
    }
}

pub type Result<T> = std::result::Result<T, NancyError>;
