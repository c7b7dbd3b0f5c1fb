//! Pipeline node contract and chain execution.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::AuditContext;
use crate::error::AuditError;
use crate::event::Event;
use crate::record::{AuditRecord, LogInput, RecordKind};

/// Which stage of a pipeline a node implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Filter,
    Formatter,
    Sink,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter => write!(f, "filter"),
            Self::Formatter => write!(f, "formatter"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// Opaque random identifier of a node within one backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stage in an audit pipeline.
///
/// `process` outcomes:
/// - `Ok(Some(event))` continues with the (possibly transformed) event,
/// - `Ok(None)` stops the pipeline for this event without error,
/// - `Err(_)` aborts the pipeline and reports the failure.
#[async_trait]
pub trait Node: Send + Sync {
    fn node_type(&self) -> NodeType;

    async fn process(
        &self,
        ctx: &AuditContext,
        event: Option<Event>,
    ) -> Result<Option<Event>, AuditError>;

    /// Release and reacquire any held resource. No-op for stateless nodes.
    fn reopen(&self) -> Result<(), AuditError>;
}

/// Node lookup by identifier. Execution order lives in a separate id list.
pub type NodeMap = HashMap<NodeId, Arc<dyn Node>>;

/// How far an event got through a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// The final node processed the event.
    Delivered,
    /// A node stopped the pipeline before the final node.
    Dropped,
}

/// Drive `event` through `nodes` in the order given by `ids`.
///
/// Stops at the first node returning `None` or an error.
pub async fn run_chain(
    ctx: &AuditContext,
    event: Event,
    ids: &[NodeId],
    nodes: &NodeMap,
) -> Result<ChainOutcome, AuditError> {
    const OP: &str = "run_chain";

    let mut current = Some(event);
    for (index, id) in ids.iter().enumerate() {
        let node = nodes
            .get(id)
            .ok_or_else(|| AuditError::invalid_parameter(OP, format!("node {id} is not registered")))?;

        let output = node
            .process(ctx, current.take())
            .await
            .map_err(|e| e.context(OP, format!("{} node {id} failed", node.node_type())))?;

        if index + 1 == ids.len() {
            return Ok(ChainOutcome::Delivered);
        }

        match output {
            Some(next) => current = Some(next),
            None => {
                tracing::trace!(node = %id, node_type = %node.node_type(), "pipeline stopped");
                return Ok(ChainOutcome::Dropped);
            }
        }
    }

    Ok(ChainOutcome::Dropped)
}

/// Send `data` through a pipeline synchronously, outside any broker.
///
/// The last node must be a sink.
pub async fn process_manual(
    ctx: &AuditContext,
    data: LogInput,
    ids: &[NodeId],
    nodes: &NodeMap,
) -> Result<ChainOutcome, AuditError> {
    const OP: &str = "process_manual";

    let Some(last) = ids.last() else {
        return Err(AuditError::invalid_parameter(OP, "ids are required"));
    };
    if nodes.is_empty() {
        return Err(AuditError::invalid_parameter(OP, "nodes are required"));
    }

    match nodes.get(last) {
        Some(node) if node.node_type() == NodeType::Sink => {}
        Some(_) => {
            return Err(AuditError::invalid_parameter(OP, "last node must be a sink"));
        }
        None => {
            return Err(AuditError::invalid_parameter(
                OP,
                format!("node {last} is not registered"),
            ));
        }
    }

    let record = AuditRecord::new(RecordKind::Request).with_data(data);
    run_chain(ctx, Event::audit(record), ids, nodes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Passes or drops every event, counting calls.
    struct StubNode {
        node_type: NodeType,
        pass: bool,
        calls: AtomicUsize,
    }

    impl StubNode {
        fn new(node_type: NodeType, pass: bool) -> Arc<Self> {
            Arc::new(Self {
                node_type,
                pass,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Node for StubNode {
        fn node_type(&self) -> NodeType {
            self.node_type
        }

        async fn process(
            &self,
            _ctx: &AuditContext,
            event: Option<Event>,
        ) -> Result<Option<Event>, AuditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if self.pass { event } else { None })
        }

        fn reopen(&self) -> Result<(), AuditError> {
            Ok(())
        }
    }

    fn pipeline(stages: Vec<Arc<StubNode>>) -> (Vec<NodeId>, NodeMap) {
        let mut ids = Vec::new();
        let mut nodes = NodeMap::new();
        for stage in stages {
            let id = NodeId::generate();
            ids.push(id.clone());
            nodes.insert(id, stage as Arc<dyn Node>);
        }
        (ids, nodes)
    }

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_run_chain_delivers_in_order() {
        let filter = StubNode::new(NodeType::Filter, true);
        let sink = StubNode::new(NodeType::Sink, false);
        let (ids, nodes) = pipeline(vec![filter.clone(), sink.clone()]);

        let event = Event::audit(AuditRecord::new(RecordKind::Request));
        let outcome = run_chain(&AuditContext::new(), event, &ids, &nodes)
            .await
            .unwrap();

        assert_eq!(outcome, ChainOutcome::Delivered);
        assert_eq!(filter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_chain_short_circuits_on_drop() {
        let filter = StubNode::new(NodeType::Filter, false);
        let sink = StubNode::new(NodeType::Sink, true);
        let (ids, nodes) = pipeline(vec![filter, sink.clone()]);

        let event = Event::audit(AuditRecord::new(RecordKind::Request));
        let outcome = run_chain(&AuditContext::new(), event, &ids, &nodes)
            .await
            .unwrap();

        assert_eq!(outcome, ChainOutcome::Dropped);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_manual_requires_sink_last() {
        let (ids, nodes) = pipeline(vec![StubNode::new(NodeType::Formatter, true)]);
        let err = process_manual(&AuditContext::new(), LogInput::default(), &ids, &nodes)
            .await
            .unwrap_err();
        assert!(err.is_invalid_parameter());
        assert!(err.to_string().contains("last node must be a sink"));
    }

    #[tokio::test]
    async fn test_process_manual_requires_ids() {
        let err = process_manual(&AuditContext::new(), LogInput::default(), &[], &NodeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_parameter());
    }
}
