//! Error types for the audit crate.
//!
//! Messages read as a chain of `operation: what went wrong: cause`, with
//! invalid-parameter and cancellation failures classifiable through any
//! amount of wrapping.

use thiserror::Error;
use warden_core::ConfigError;

use crate::expression::ExpressionError;

/// Errors that can occur while building or running an audit pipeline.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A required argument was missing, empty, or of the wrong kind.
    #[error("{op}: {message}: invalid parameter")]
    InvalidParameter { op: &'static str, message: String },

    /// The caller gave up before the node did any work.
    #[error("{op}: context canceled")]
    Cancelled { op: &'static str },

    /// The filter expression could not be compiled.
    #[error("invalid filter expression {expression:?}: {source}")]
    FilterParse {
        expression: String,
        #[source]
        source: ExpressionError,
    },

    /// The filter expression could not be evaluated against a record.
    #[error("unable to evaluate filter: {0}")]
    FilterEvaluation(#[source] ExpressionError),

    /// Salt could not be loaded or generated.
    #[error("salt error: {0}")]
    Salt(String),

    /// A sink could not open or write its target.
    #[error("sink {path:?} failed: {source}")]
    Sink {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A mutex guarding node state was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// A device with this name is already registered.
    #[error("audit device {0:?} is already registered")]
    DuplicateBackend(String),

    /// Only one fallback device may be registered at a time.
    #[error("a fallback audit device is already registered: {existing:?}")]
    FallbackAlreadyRegistered { existing: String },

    /// No device is registered under this name.
    #[error("no audit device registered as {0:?}")]
    UnknownBackend(String),

    /// Every device that tried to record the event failed, keyed by device name.
    #[error("audit event was not recorded by any device: {}", join_failures(.0))]
    NotRecorded(Vec<(String, AuditError)>),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registration error.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error annotated with the operation that observed it.
    #[error("{op}: {message}: {source}")]
    Context {
        op: &'static str,
        message: String,
        #[source]
        source: Box<AuditError>,
    },
}

impl AuditError {
    /// A missing, empty, or mistyped argument to `op`.
    pub fn invalid_parameter(op: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            op,
            message: message.into(),
        }
    }

    /// `op` saw a cancelled context before doing any work.
    pub fn cancelled(op: &'static str) -> Self {
        Self::Cancelled { op }
    }

    /// Wrap this error with the operation and step that failed.
    pub fn context(self, op: &'static str, message: impl Into<String>) -> Self {
        Self::Context {
            op,
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any [`AuditError::Context`] wrappers.
    pub fn root(&self) -> &AuditError {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether the innermost error is [`AuditError::InvalidParameter`].
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self.root(), Self::InvalidParameter { .. })
    }

    /// Whether the caller gave up, rather than processing failing.
    ///
    /// An unrecorded event counts as cancelled when every device failed
    /// because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self.root() {
            Self::Cancelled { .. } => true,
            Self::NotRecorded(failures) => {
                !failures.is_empty() && failures.iter().all(|(_, e)| e.is_cancelled())
            }
            _ => false,
        }
    }
}

fn join_failures(failures: &[(String, AuditError)]) -> String {
    failures
        .iter()
        .map(|(device, e)| format!("{device}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain_message() {
        let err = AuditError::invalid_parameter("EntryFilter::new", "empty filter expression")
            .context("FileBackend::new", "error configuring filter node");

        assert_eq!(
            err.to_string(),
            "FileBackend::new: error configuring filter node: EntryFilter::new: empty filter expression: invalid parameter"
        );
        assert!(err.is_invalid_parameter());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_classification() {
        let err = AuditError::cancelled("EntryFilter::process").context("run_chain", "node failed");
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("context canceled"));
    }

    #[test]
    fn test_not_recorded_lists_failures() {
        let err = AuditError::NotRecorded(vec![
            ("a/".to_string(), AuditError::Salt("boom".to_string())),
            ("b/".to_string(), AuditError::cancelled("EntryFormatter::process")),
        ]);
        assert_eq!(
            err.to_string(),
            "audit event was not recorded by any device: a/: salt error: boom; b/: EntryFormatter::process: context canceled"
        );
        // Only one of the two devices was cancelled.
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_not_recorded_all_cancelled() {
        let err = AuditError::NotRecorded(vec![(
            "a/".to_string(),
            AuditError::cancelled("EntryFormatter::process").context("run_chain", "node failed"),
        )]);
        assert!(err.is_cancelled());
        assert!(!AuditError::NotRecorded(Vec::new()).is_cancelled());
    }
}
