//! Audit devices: pipelines assembled from device configuration.

use async_trait::async_trait;
use std::sync::Arc;
use warden_core::{DeviceOptions, SinkTarget, DISCARD, STDOUT};

use crate::context::AuditContext;
use crate::error::AuditError;
use crate::event::EventType;
use crate::filter::EntryFilter;
use crate::formatter::{EntryFormatter, FormatterConfig};
use crate::headers::HeaderFormatter;
use crate::metrics::{FallbackLabeler, Labeler, MetricsCounter, SinkLabeler, SinkMetricTimer, SinkMetrics};
use crate::node::{process_manual, Node, NodeId, NodeMap, NodeType};
use crate::record::LogInput;
use crate::salt::{Salt, SaltCache, SaltConfig, SaltStorage, Salter};

/// Everything needed to build one audit device.
#[derive(Clone)]
pub struct BackendConfig {
    /// Mount path the device is enabled at; also its name.
    pub mount_path: String,
    pub options: DeviceOptions,
    pub salt_config: SaltConfig,
    /// Storage the device's salt is persisted in.
    pub salt_view: Arc<dyn SaltStorage>,
}

/// One configured audit device, as seen by the broker.
#[async_trait]
pub trait Backend: Salter {
    /// The mount path.
    fn name(&self) -> &str;

    fn nodes(&self) -> &NodeMap;

    /// Execution order of [`Backend::nodes`].
    fn node_ids(&self) -> &[NodeId];

    fn event_type(&self) -> EventType;

    /// Whether the pipeline starts with a filter.
    fn has_filtering(&self) -> bool;

    /// Whether this device receives events no filtering device recorded.
    fn is_fallback(&self) -> bool;

    /// Drive a synthetic record through the whole pipeline.
    async fn log_test_message(&self, ctx: &AuditContext, input: LogInput) -> Result<(), AuditError>;

    /// Reopen the sink, e.g. after the log file was rotated.
    async fn reload(&self, ctx: &AuditContext) -> Result<(), AuditError>;

    /// Drop the cached salt so the next use reloads it.
    async fn invalidate(&self, ctx: &AuditContext);
}

/// Audit device writing to a file, stdout, or nowhere.
pub struct FileBackend {
    name: String,
    fallback: bool,
    node_ids: Vec<NodeId>,
    nodes: NodeMap,
    salt: Arc<SaltCache>,
}

impl FileBackend {
    /// Build the device with the process-wide sink metrics.
    pub fn new(
        config: BackendConfig,
        headers: Option<Arc<dyn HeaderFormatter>>,
    ) -> Result<Self, AuditError> {
        let metrics = SinkMetrics::global()
            .map_err(|e| e.context("FileBackend::new", "unable to register metrics"))?;
        Self::with_metrics(config, headers, metrics)
    }

    pub fn with_metrics(
        config: BackendConfig,
        headers: Option<Arc<dyn HeaderFormatter>>,
        metrics: Arc<SinkMetrics>,
    ) -> Result<Self, AuditError> {
        const OP: &str = "FileBackend::new";

        let name = config.mount_path.trim().to_string();
        if name.is_empty() {
            return Err(AuditError::invalid_parameter(OP, "mount path is required"));
        }

        let options = &config.options;
        if options.fallback && options.filter.is_some() {
            return Err(AuditError::invalid_parameter(
                OP,
                "cannot configure a fallback device with a filter",
            ));
        }

        let salt = Arc::new(SaltCache::new(config.salt_view.clone(), config.salt_config.clone()));

        let mut backend = Self {
            name,
            fallback: options.fallback,
            node_ids: Vec::new(),
            nodes: NodeMap::new(),
            salt,
        };

        if let Some(filter) = options.filter.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            let filter = EntryFilter::new(filter).map_err(|e| e.context(OP, "error creating filter"))?;
            backend.push(Arc::new(filter));
        }

        let mut formatter = EntryFormatter::new(
            FormatterConfig::from_options(options),
            backend.salt.clone() as Arc<dyn Salter>,
        );
        if let Some(headers) = headers {
            formatter = formatter.with_header_formatter(headers);
        }
        if let Some(prefix) = options.prefix.as_deref().filter(|p| !p.is_empty()) {
            formatter = formatter.with_prefix(prefix);
        }
        backend.push(Arc::new(formatter));

        let sink = backend
            .build_sink(options, metrics)
            .map_err(|e| e.context(OP, "error creating sink"))?;
        backend.push(sink);

        tracing::info!(
            device = %backend.name,
            fallback = backend.fallback,
            filtering = backend.has_filtering(),
            format = %options.format,
            "audit device configured"
        );

        Ok(backend)
    }

    fn push(&mut self, node: Arc<dyn Node>) {
        let id = NodeId::generate();
        self.node_ids.push(id.clone());
        self.nodes.insert(id, node);
    }

    /// The sink for the configured target, timed and then counted.
    fn build_sink(
        &self,
        options: &DeviceOptions,
        metrics: Arc<SinkMetrics>,
    ) -> Result<Arc<dyn Node>, AuditError> {
        let (sink_name, sink): (&str, Arc<dyn Node>) = match options.sink_target() {
            SinkTarget::Discard => (DISCARD, Arc::new(crate::sink::NoopSink::new())),
            SinkTarget::Stdout => (STDOUT, Arc::new(crate::sink::StdoutSink::new(options.format))),
            SinkTarget::File(path) => {
                let mode = options.file_mode()?;
                let sink = crate::sink::FileSink::new(path, options.format, mode)?;
                (self.name.as_str(), Arc::new(sink))
            }
        };

        let labeler: Arc<dyn Labeler> = if self.fallback {
            Arc::new(FallbackLabeler)
        } else {
            Arc::new(SinkLabeler)
        };

        let timer = SinkMetricTimer::new(sink_name, sink, metrics.clone())?;
        let counter = MetricsCounter::new(sink_name, Arc::new(timer), labeler, metrics)?;
        Ok(Arc::new(counter))
    }
}

#[async_trait]
impl Salter for FileBackend {
    async fn salt(&self, ctx: &AuditContext) -> Result<Arc<Salt>, AuditError> {
        self.salt.salt(ctx).await
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    fn event_type(&self) -> EventType {
        EventType::Audit
    }

    fn has_filtering(&self) -> bool {
        self.node_ids
            .first()
            .and_then(|id| self.nodes.get(id))
            .is_some_and(|node| node.node_type() == NodeType::Filter)
    }

    fn is_fallback(&self) -> bool {
        self.fallback
    }

    async fn log_test_message(&self, ctx: &AuditContext, input: LogInput) -> Result<(), AuditError> {
        if self.node_ids.is_empty() {
            return Ok(());
        }

        process_manual(ctx, input, &self.node_ids, &self.nodes)
            .await
            .map(|_| ())
            .map_err(|e| e.context("FileBackend::log_test_message", format!("device {}", self.name)))
    }

    async fn reload(&self, _ctx: &AuditContext) -> Result<(), AuditError> {
        for id in &self.node_ids {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.node_type() == NodeType::Sink {
                node.reopen()?;
            }
        }

        tracing::info!(device = %self.name, "audit device reloaded");
        Ok(())
    }

    async fn invalidate(&self, _ctx: &AuditContext) {
        self.salt.invalidate().await;
        tracing::info!(device = %self.name, "audit salt invalidated");
    }
}
