//! Metrics & Health (C8, §4.8).
//!
//! Counters/histograms/gauges are `prometheus` primitives, matching the
//! teacher workspace's `dashflow-observability` crate
//! (`metrics_server.rs`/`metrics.rs`), scraped the same way: a registry is
//! built once at startup and exported as Prometheus text format behind
//! `GET /metrics`.

use std::collections::HashMap;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use serde::{Deserialize, Serialize};

use crate::brains::{BrainKind, HealthStatus};

/// Aggregate health status (§4.8: "degraded if any brain is unhealthy but
/// at least one is healthy; unhealthy if zero brains are healthy").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_p50_ms: f64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateHealth {
    pub status: AggregateStatus,
    pub components: Vec<ComponentHealth>,
}

pub fn aggregate(components: Vec<ComponentHealth>) -> AggregateHealth {
    let healthy_count = components
        .iter()
        .filter(|c| c.status == HealthStatus::Healthy)
        .count();
    let status = if healthy_count == components.len() && !components.is_empty() {
        AggregateStatus::Healthy
    } else if healthy_count > 0 {
        AggregateStatus::Degraded
    } else {
        AggregateStatus::Unhealthy
    };
    AggregateHealth { status, components }
}

/// A snapshot of the current counters/gauges, serializable for `GET
/// /metrics` JSON consumers and the Prometheus text exporter alike.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub packets_ingested: u64,
    pub packets_skipped: u64,
    pub packets_failed: u64,
    pub queries_received: u64,
    pub queries_succeeded: u64,
    pub queries_degraded: u64,
    pub per_brain_writes: HashMap<BrainKind, u64>,
    pub per_brain_reads: HashMap<BrainKind, u64>,
    pub in_flight_packets: i64,
    pub in_flight_queries: i64,
    pub mcp_servers_healthy: i64,
    pub mcp_servers_total: i64,
}

/// The `prometheus` registry and the typed handles into it (§4.8).
pub struct Metrics {
    registry: Registry,

    packets_received: IntCounter,
    packets_ingested: IntCounter,
    packets_skipped: IntCounter,
    packets_failed: IntCounter,
    queries_received: IntCounter,
    queries_succeeded: IntCounter,
    queries_degraded: IntCounter,

    per_brain_writes: prometheus::IntCounterVec,
    per_brain_reads: prometheus::IntCounterVec,

    ingest_latency: Histogram,
    query_latency: Histogram,
    per_brain_latency: prometheus::HistogramVec,

    in_flight_packets: IntGauge,
    in_flight_queries: IntGauge,
    mcp_servers_healthy: IntGauge,
    mcp_servers_total: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        macro_rules! counter {
            ($name:literal, $help:literal) => {{
                let c = IntCounter::new($name, $help).expect("valid metric spec");
                registry.register(Box::new(c.clone())).expect("register");
                c
            }};
        }
        macro_rules! gauge {
            ($name:literal, $help:literal) => {{
                let g = IntGauge::new($name, $help).expect("valid metric spec");
                registry.register(Box::new(g.clone())).expect("register");
                g
            }};
        }

        let packets_received = counter!("nancy_packets_received_total", "Knowledge packets received");
        let packets_ingested = counter!("nancy_packets_ingested_total", "Knowledge packets fully ingested");
        let packets_skipped = counter!("nancy_packets_skipped_total", "Knowledge packets skipped as duplicates");
        let packets_failed = counter!("nancy_packets_failed_total", "Knowledge packets that failed ingestion");
        let queries_received = counter!("nancy_queries_received_total", "Queries received");
        let queries_succeeded = counter!("nancy_queries_succeeded_total", "Queries answered without degradation");
        let queries_degraded = counter!("nancy_queries_degraded_total", "Queries answered in degraded mode");

        let per_brain_writes = prometheus::IntCounterVec::new(
            prometheus::Opts::new("nancy_brain_writes_total", "Brain adapter write calls"),
            &["brain"],
        )
        .expect("valid metric spec");
        registry
            .register(Box::new(per_brain_writes.clone()))
            .expect("register");

        let per_brain_reads = prometheus::IntCounterVec::new(
            prometheus::Opts::new("nancy_brain_reads_total", "Brain adapter read calls"),
            &["brain"],
        )
        .expect("valid metric spec");
        registry
            .register(Box::new(per_brain_reads.clone()))
            .expect("register");

        let ingest_latency = Histogram::with_opts(HistogramOpts::new(
            "nancy_ingest_latency_seconds",
            "End-to-end ingest latency",
        ))
        .expect("valid metric spec");
        registry
            .register(Box::new(ingest_latency.clone()))
            .expect("register");

        let query_latency = Histogram::with_opts(HistogramOpts::new(
            "nancy_query_latency_seconds",
            "End-to-end query latency",
        ))
        .expect("valid metric spec");
        registry
            .register(Box::new(query_latency.clone()))
            .expect("register");

        let per_brain_latency = prometheus::HistogramVec::new(
            HistogramOpts::new("nancy_brain_latency_seconds", "Per-brain adapter call latency"),
            &["brain"],
        )
        .expect("valid metric spec");
        registry
            .register(Box::new(per_brain_latency.clone()))
            .expect("register");

        let in_flight_packets = gauge!("nancy_in_flight_packets", "Packets currently being ingested");
        let in_flight_queries = gauge!("nancy_in_flight_queries", "Queries currently executing");
        let mcp_servers_healthy = gauge!("nancy_mcp_servers_healthy", "Healthy MCP servers");
        let mcp_servers_total = gauge!("nancy_mcp_servers_total", "Configured MCP servers");

        Self {
            registry,
            packets_received,
            packets_ingested,
            packets_skipped,
            packets_failed,
            queries_received,
            queries_succeeded,
            queries_degraded,
            per_brain_writes,
            per_brain_reads,
            ingest_latency,
            query_latency,
            per_brain_latency,
            in_flight_packets,
            in_flight_queries,
            mcp_servers_healthy,
            mcp_servers_total,
        }
    }

    pub fn record_packet_received(&self) {
        self.packets_received.inc();
    }
    pub fn record_packet_outcome(&self, outcome: crate::history::IngestOutcome) {
        use crate::history::IngestOutcome::*;
        match outcome {
            Ingested => self.packets_ingested.inc(),
            SkippedDuplicate => self.packets_skipped.inc(),
            Partial => {} // neither fully ingested nor failed; no dedicated counter in §4.8
            Failed => self.packets_failed.inc(),
        }
    }
    pub fn record_query_received(&self) {
        self.queries_received.inc();
    }
    pub fn record_query_outcome(&self, degraded: bool) {
        if degraded {
            self.queries_degraded.inc();
        } else {
            self.queries_succeeded.inc();
        }
    }
    pub fn record_brain_write(&self, brain: BrainKind) {
        self.per_brain_writes.with_label_values(&[brain.as_str()]).inc();
    }
    pub fn record_brain_read(&self, brain: BrainKind) {
        self.per_brain_reads.with_label_values(&[brain.as_str()]).inc();
    }
    pub fn observe_ingest_latency(&self, seconds: f64) {
        self.ingest_latency.observe(seconds);
    }
    pub fn observe_query_latency(&self, seconds: f64) {
        self.query_latency.observe(seconds);
    }
    pub fn observe_brain_latency(&self, brain: BrainKind, seconds: f64) {
        self.per_brain_latency
            .with_label_values(&[brain.as_str()])
            .observe(seconds);
    }
    pub fn set_in_flight_packets(&self, n: i64) {
        self.in_flight_packets.set(n);
    }
    pub fn set_in_flight_queries(&self, n: i64) {
        self.in_flight_queries.set(n);
    }
    pub fn set_mcp_servers_healthy(&self, n: i64) {
        self.mcp_servers_healthy.set(n);
    }
    pub fn set_mcp_servers_total(&self, n: i64) {
        self.mcp_servers_total.set(n);
    }

    /// Render the current state as Prometheus text exposition format
    /// (`GET /metrics`, §6).
    pub fn export(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("prometheus text encoding never fails for well-formed metrics");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid UTF-8")
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut per_brain_writes = HashMap::new();
        let mut per_brain_reads = HashMap::new();
        for brain in [BrainKind::Vector, BrainKind::Analytical, BrainKind::Graph, BrainKind::Llm] {
            per_brain_writes.insert(brain, self.per_brain_writes.with_label_values(&[brain.as_str()]).get());
            per_brain_reads.insert(brain, self.per_brain_reads.with_label_values(&[brain.as_str()]).get());
        }
        MetricsSnapshot {
            packets_received: self.packets_received.get(),
            packets_ingested: self.packets_ingested.get(),
            packets_skipped: self.packets_skipped.get(),
            packets_failed: self.packets_failed.get(),
            queries_received: self.queries_received.get(),
            queries_succeeded: self.queries_succeeded.get(),
            queries_degraded: self.queries_degraded.get(),
            per_brain_writes,
            per_brain_reads,
            in_flight_packets: self.in_flight_packets.get(),
            in_flight_queries: self.in_flight_queries.get(),
            mcp_servers_healthy: self.mcp_servers_healthy.get(),
            mcp_servers_total: self.mcp_servers_total.get(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BrainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrainKind::Vector => "vector",
            BrainKind::Analytical => "analytical",
            BrainKind::Graph => "graph",
            BrainKind::Llm => "llm",
        }
    }
}
