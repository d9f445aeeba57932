//! Nancy: a knowledge-management substrate that routes Knowledge Packets
//! into four specialized storage brains (vector, analytical, graph, LLM)
//! and answers questions by orchestrating concurrent sub-queries across
//! them.
//!
//! `NancyCore` is the library's single entry point; `bin/nancy_service.rs`
//! wires it behind an HTTP surface when built with the `service` feature.

pub mod brains;
pub mod config;
pub mod error;
pub mod history;
pub mod legacy;
pub mod mcp;
pub mod metrics;
pub mod mode;
pub mod packet;
pub mod query;
pub mod router;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use brains::{
    AnalyticalBrain, GraphBrain, Health, InMemoryAnalyticalBrain, InMemoryGraphBrain,
    InMemoryLlmBrain, InMemoryVectorBrain, LlmBrain, VectorBrain,
};
use config::NancyConfig;
use error::{NancyError, Result};
use history::IngestHistory;
use legacy::LegacyUpload;
use mcp::McpHost;
use metrics::{aggregate, AggregateHealth, ComponentHealth, Metrics, MetricsSnapshot};
use mode::{Mode, ModeGate};
use query::{QueryOptions, QueryOrchestrator, QueryResponse};
use router::{IngestResponse, IngestionRouter};

/// The assembled service: brains, router, MCP host, mode gate, and
/// metrics, wired together per the configuration document (§6).
pub struct NancyCore {
    config: NancyConfig,
    mode_gate: Arc<ModeGate>,
    metrics: Arc<Metrics>,
    vector: Arc<dyn VectorBrain>,
    analytical: Arc<dyn AnalyticalBrain>,
    graph: Arc<dyn GraphBrain>,
    llm: Arc<dyn LlmBrain>,
    router: Arc<IngestionRouter>,
    orchestrator: Arc<QueryOrchestrator>,
    mcp_host: Arc<McpHost>,
    mcp_started: AtomicBool,
}

impl NancyCore {
    /// Assemble every component from `config` without starting any
    /// background tasks (MCP servers are launched separately by [`Self::start`]).
    ///
    /// The reference brains shipped here are in-memory stand-ins for the
    /// externally owned vector/analytical/graph/LLM engines (§1 Non-goals);
    /// swapping in real backends means constructing different
    /// `Arc<dyn ...Brain>` values here, not changing any other component.
    pub fn bootstrap(config: NancyConfig) -> Result<Arc<Self>> {
        let vector: Arc<dyn VectorBrain> = Arc::new(InMemoryVectorBrain::new());
        let analytical: Arc<dyn AnalyticalBrain> = Arc::new(InMemoryAnalyticalBrain::new());
        let graph: Arc<dyn GraphBrain> = Arc::new(InMemoryGraphBrain::new());
        let llm: Arc<dyn LlmBrain> = Arc::new(InMemoryLlmBrain::new());

        let history = Arc::new(IngestHistory::new());
        let metrics = Arc::new(Metrics::new());
        let mode_gate = Arc::new(ModeGate::new(config.nancy_core.mode));

        let router = Arc::new(IngestionRouter::new(
            Arc::clone(&vector),
            Arc::clone(&analytical),
            Arc::clone(&graph),
            history,
            Arc::clone(&metrics),
            config.retry.clone(),
            config.limits.per_brain_in_flight,
            config.limits.ingest_in_flight,
        ));

        let orchestrator = Arc::new(QueryOrchestrator::new(
            Arc::clone(&vector),
            Arc::clone(&analytical),
            Arc::clone(&graph),
            Arc::clone(&llm),
            Arc::clone(&metrics),
            &config.orchestration,
        ));

        let mcp_host = Arc::new(McpHost::new(
            config.mcp_servers.enabled_servers.clone(),
            Arc::clone(&router),
            Arc::clone(&metrics),
        ));

        Ok(Arc::new(Self {
            config,
            mode_gate,
            metrics,
            vector,
            analytical,
            graph,
            llm,
            router,
            orchestrator,
            mcp_host,
            mcp_started: AtomicBool::new(false),
        }))
    }

    /// Load configuration from the environment (`NANCY_CONFIG_PATH`,
    /// `NANCY_MODE`) and bootstrap. At least one brain must be healthy, or
    /// startup fails (§7 "Fatal: no healthy brains available at startup").
    pub async fn start_from_env() -> Result<Arc<Self>> {
        let config = NancyConfig::load()?;
        let core = Self::bootstrap(config)?;
        core.ensure_startup_health().await?;
        core.start().await;
        Ok(core)
    }

    async fn ensure_startup_health(&self) -> Result<()> {
        let health = self.health().await;
        if health.status == metrics::AggregateStatus::Unhealthy {
            return Err(NancyError::NoHealthyBrains);
        }
        Ok(())
    }

    /// Launch the MCP host if the current mode requires it (§4.7 "hybrid"/"mcp").
    pub async fn start(self: &Arc<Self>) {
        if self.mode_gate.mode().starts_mcp_host() {
            self.mcp_host.start_all().await;
            self.mcp_started.store(true, Ordering::SeqCst);
            info!("mcp host started");
        }
    }

    pub fn config(&self) -> &NancyConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode_gate.mode()
    }

    /// Switch modes, draining in-flight ingestion first so no packet is
    /// dropped mid-dispatch (§4.7 "Mode transitions never drop in-flight
    /// work").
    pub async fn set_mode(self: &Arc<Self>, new_mode: Mode) -> Result<()> {
        self.router.drain().await;
        self.mode_gate.transition(new_mode);
        if new_mode.starts_mcp_host() && !self.mcp_started.swap(true, Ordering::SeqCst) {
            self.mcp_host.start_all().await;
            info!("mcp host started after mode transition");
        }
        Ok(())
    }

    /// `POST /ingest/knowledge-packet` (§6).
    pub async fn ingest_knowledge_packet(&self, raw: &serde_json::Value) -> Result<IngestResponse> {
        self.mode_gate.require_knowledge_packet_ingest()?;
        self.router.ingest(raw).await
    }

    /// `POST /ingest/legacy` (§6, mode ≠ mcp).
    pub async fn ingest_legacy(&self, upload: LegacyUpload) -> Result<IngestResponse> {
        self.mode_gate.require_legacy_ingest()?;
        let packet = legacy::convert(upload);
        let raw = serde_json::to_value(&packet).expect("a converted legacy packet always serializes");
        self.router.ingest(&raw).await
    }

    /// `nancy/ingest` forwarded from an MCP server (§4.4 "Forward").
    pub async fn ingest_via_mcp(&self, file_path: &str, content_type: &str, metadata: serde_json::Value) -> Result<IngestResponse> {
        self.mode_gate.require_knowledge_packet_ingest()?;
        self.mcp_host.ingest_file(file_path, content_type, metadata).await
    }

    /// `POST /query` (§6, §4.6).
    pub async fn query(&self, question: &str, options: QueryOptions) -> Result<QueryResponse> {
        self.orchestrator.query(question, options).await
    }

    /// `GET /health` (§4.8): aggregate over the four brain adapters.
    pub async fn health(&self) -> AggregateHealth {
        let (vector, analytical, graph, llm) = tokio::join!(
            self.vector.health(),
            self.analytical.health(),
            self.graph.health(),
            self.llm.health(),
        );
        let components = vec![
            component("vector", vector),
            component("analytical", analytical),
            component("graph", graph),
            component("llm", llm),
        ];
        let mut health = aggregate(components);
        if self.mcp_started.load(Ordering::SeqCst) {
            let healthy = self.mcp_host.healthy_count();
            let total = self.mcp_host.descriptors().len() as i64;
            if total > 0 && healthy == 0 && health.status == metrics::AggregateStatus::Healthy {
                warn!("all mcp servers unhealthy");
                health.status = metrics::AggregateStatus::Degraded;
            }
        }
        health
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_export(&self) -> String {
        self.metrics.export()
    }

    pub async fn shutdown(&self) {
        if self.mcp_started.load(Ordering::SeqCst) {
            self.mcp_host.shutdown_all().await;
        }
    }
}

fn component(name: &str, health: Health) -> ComponentHealth {
    ComponentHealth {
        name: name.to_string(),
        status: health.status,
        latency_p50_ms: health.latency_p50_ms,
        last_error: health.last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_packet() -> serde_json::Value {
        let content = json!({
            "vector_data": {
                "chunks": [{"chunk_id": "c1", "text": "Thermal constraints: max 85C"}],
                "embedding_model": "test-embed",
            }
        });
        let packet_id = packet::content_hash(&content);
        json!({
            "packet_version": "1.0.0",
            "packet_id": packet_id,
            "timestamp": "2026-01-01T00:00:00Z",
            "source": {
                "mcp_server_name": "test",
                "server_version": "1.0.0",
                "original_location": "thermal.md",
                "content_type": "document",
            },
            "metadata": {"title": "Thermal Analysis"},
            "content": content,
        })
    }

    #[tokio::test]
    async fn bootstrap_starts_healthy_and_accepts_a_packet_in_hybrid_mode() {
        let core = NancyCore::bootstrap(NancyConfig::default()).unwrap();
        assert_eq!(core.mode(), Mode::Hybrid);
        let health = core.health().await;
        assert_eq!(health.status, metrics::AggregateStatus::Healthy);

        let response = core.ingest_knowledge_packet(&sample_packet()).await.unwrap();
        assert_eq!(response.outcome, history::IngestOutcome::Ingested);
    }

    #[tokio::test]
    async fn mcp_mode_rejects_legacy_uploads() {
        let mut config = NancyConfig::default();
        config.nancy_core.mode = Mode::Mcp;
        let core = NancyCore::bootstrap(config).unwrap();
        let upload = LegacyUpload {
            file_name: "a.txt".to_string(),
            text: "hello".to_string(),
            author: None,
            tags: Vec::new(),
        };
        let err = core.ingest_legacy(upload).await.unwrap_err();
        assert!(matches!(err, NancyError::ModeRejection { .. }));
    }

    #[tokio::test]
    async fn set_mode_drains_before_transitioning() {
        let core = NancyCore::bootstrap(NancyConfig::default()).unwrap();
        core.set_mode(Mode::Legacy).await.unwrap();
        assert_eq!(core.mode(), Mode::Legacy);
        let err = core.ingest_knowledge_packet(&sample_packet()).await.unwrap_err();
        assert!(matches!(err, NancyError::ModeRejection { .. }));
    }
}
