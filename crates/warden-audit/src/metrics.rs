//! Prometheus instrumentation wrapped around sink nodes.

use async_trait::async_trait;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::context::AuditContext;
use crate::error::AuditError;
use crate::event::Event;
use crate::node::{Node, NodeType};

static GLOBAL: OnceLock<Arc<SinkMetrics>> = OnceLock::new();

/// Sink latency and outcome metrics, registered in their own registry.
pub struct SinkMetrics {
    registry: Registry,
    duration: HistogramVec,
    events: CounterVec,
}

impl SinkMetrics {
    pub fn new() -> Result<Self, AuditError> {
        let registry = Registry::new();

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "warden_audit_sink_duration_seconds",
                "Time spent writing audit entries to a sink",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["sink"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        let events = CounterVec::new(
            Opts::new(
                "warden_audit_sink_events_total",
                "Audit entries handed to a sink, by device kind and outcome",
            ),
            &["sink", "device", "outcome"],
        )?;
        registry.register(Box::new(events.clone()))?;

        Ok(Self {
            registry,
            duration,
            events,
        })
    }

    /// Process-wide instance shared by every backend.
    pub fn global() -> Result<Arc<Self>, AuditError> {
        if let Some(metrics) = GLOBAL.get() {
            return Ok(Arc::clone(metrics));
        }
        let metrics = Arc::new(Self::new()?);
        Ok(Arc::clone(GLOBAL.get_or_init(|| metrics)))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text format.
    pub fn metrics_text(&self) -> Result<String, AuditError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn observe_duration(&self, sink: &str, seconds: f64) {
        self.duration.with_label_values(&[sink]).observe(seconds);
    }

    fn record_event(&self, sink: &str, device: &str, outcome: &str) {
        self.events.with_label_values(&[sink, device, outcome]).inc();
    }
}

/// Names the kind of device a counted sink belongs to.
pub trait Labeler: Send + Sync {
    fn device_label(&self) -> &'static str;
}

/// Label for regular devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkLabeler;

impl Labeler for SinkLabeler {
    fn device_label(&self) -> &'static str {
        "sink"
    }
}

/// Label for the fallback device.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackLabeler;

impl Labeler for FallbackLabeler {
    fn device_label(&self) -> &'static str {
        "fallback"
    }
}

fn require_sink(op: &'static str, name: &str, node: &dyn Node) -> Result<String, AuditError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuditError::invalid_parameter(op, "name is required"));
    }
    if node.node_type() != NodeType::Sink {
        return Err(AuditError::invalid_parameter(
            op,
            format!("node must be a sink, got {}", node.node_type()),
        ));
    }
    Ok(name.to_string())
}

/// Records how long the wrapped sink takes per event.
pub struct SinkMetricTimer {
    name: String,
    sink: Arc<dyn Node>,
    metrics: Arc<SinkMetrics>,
}

impl SinkMetricTimer {
    pub fn new(name: &str, sink: Arc<dyn Node>, metrics: Arc<SinkMetrics>) -> Result<Self, AuditError> {
        let name = require_sink("SinkMetricTimer::new", name, sink.as_ref())?;
        Ok(Self { name, sink, metrics })
    }
}

#[async_trait]
impl Node for SinkMetricTimer {
    fn node_type(&self) -> NodeType {
        NodeType::Sink
    }

    async fn process(
        &self,
        ctx: &AuditContext,
        event: Option<Event>,
    ) -> Result<Option<Event>, AuditError> {
        let start = Instant::now();
        let result = self.sink.process(ctx, event).await;
        self.metrics
            .observe_duration(&self.name, start.elapsed().as_secs_f64());
        result
    }

    fn reopen(&self) -> Result<(), AuditError> {
        self.sink.reopen()
    }
}

/// Counts successes and failures of the wrapped sink.
pub struct MetricsCounter {
    name: String,
    node: Arc<dyn Node>,
    labeler: Arc<dyn Labeler>,
    metrics: Arc<SinkMetrics>,
}

impl MetricsCounter {
    pub fn new(
        name: &str,
        node: Arc<dyn Node>,
        labeler: Arc<dyn Labeler>,
        metrics: Arc<SinkMetrics>,
    ) -> Result<Self, AuditError> {
        let name = require_sink("MetricsCounter::new", name, node.as_ref())?;
        Ok(Self {
            name,
            node,
            labeler,
            metrics,
        })
    }
}

#[async_trait]
impl Node for MetricsCounter {
    fn node_type(&self) -> NodeType {
        NodeType::Sink
    }

    async fn process(
        &self,
        ctx: &AuditContext,
        event: Option<Event>,
    ) -> Result<Option<Event>, AuditError> {
        let result = self.node.process(ctx, event).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        self.metrics
            .record_event(&self.name, self.labeler.device_label(), outcome);
        result
    }

    fn reopen(&self) -> Result<(), AuditError> {
        self.node.reopen()
    }
}
