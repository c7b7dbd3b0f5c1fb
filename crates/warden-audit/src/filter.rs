//! Filter node deciding whether an audit event is worth recording.

use async_trait::async_trait;

use crate::context::AuditContext;
use crate::error::AuditError;
use crate::event::Event;
use crate::expression::Expression;
use crate::node::{Node, NodeType};

/// Drops audit events whose record does not satisfy a compiled expression.
///
/// The expression is compiled once and never mutated, so `process` takes no
/// locks and may run concurrently from any number of callers.
#[derive(Debug, Clone)]
pub struct EntryFilter {
    expression: Expression,
}

impl EntryFilter {
    /// Compile `filter` into a new filter node.
    pub fn new(filter: &str) -> Result<Self, AuditError> {
        const OP: &str = "EntryFilter::new";

        let filter = filter.trim();
        if filter.is_empty() {
            return Err(AuditError::invalid_parameter(
                OP,
                "cannot create new audit filter with empty filter expression",
            ));
        }

        let expression = Expression::parse(filter)
            .map_err(|source| AuditError::FilterParse {
                expression: filter.to_string(),
                source,
            })
            .map_err(|e| e.context(OP, "cannot create new audit filter"))?;

        Ok(Self { expression })
    }

    pub fn expression(&self) -> &str {
        self.expression.as_str()
    }
}

#[async_trait]
impl Node for EntryFilter {
    fn node_type(&self) -> NodeType {
        NodeType::Filter
    }

    async fn process(
        &self,
        ctx: &AuditContext,
        event: Option<Event>,
    ) -> Result<Option<Event>, AuditError> {
        const OP: &str = "EntryFilter::process";

        if ctx.is_cancelled() {
            return Err(AuditError::cancelled(OP));
        }

        let Some(event) = event else {
            return Err(AuditError::invalid_parameter(OP, "event is nil"));
        };

        let matched = {
            let Some(record) = event.payload.as_audit() else {
                return Err(AuditError::invalid_parameter(OP, "cannot parse event payload"));
            };

            // Nothing to audit.
            let Some(data) = record.data.as_ref() else {
                return Ok(None);
            };

            let namespace = ctx
                .namespace()
                .or_else(|| data.request_namespace())
                .ok_or_else(|| AuditError::invalid_parameter(OP, "cannot obtain namespace"))?;

            let fields = data.filter_fields(namespace);
            self.expression
                .evaluate(&fields)
                .map_err(|e| AuditError::FilterEvaluation(e).context(OP, "filter failed"))?
        };

        if !matched {
            tracing::debug!(filter = %self.expression.as_str(), "audit event did not match filter");
            return Ok(None);
        }

        Ok(Some(event))
    }

    fn reopen(&self) -> Result<(), AuditError> {
        Ok(())
    }
}
