//! Per-call context threaded through every node.

use tokio_util::sync::CancellationToken;

use crate::record::Namespace;

/// Cancellation and request-scoped values for one pass through a pipeline.
///
/// Cloning shares the cancellation token, so cancelling any clone cancels
/// them all.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    token: CancellationToken,
    namespace: Option<Namespace>,
}

impl AuditContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing token, typically one owned by the request handler.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Namespace the audited request was made in.
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// A context cancelled along with this one but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            namespace: self.namespace.clone(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_clones_and_children() {
        let ctx = AuditContext::new();
        let clone = ctx.clone();
        let child = ctx.child();

        assert!(!child.is_cancelled());
        ctx.cancel();
        assert!(clone.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let ctx = AuditContext::new().with_namespace(Namespace::root());
        let child = ctx.child();
        child.cancel();

        assert!(!ctx.is_cancelled());
        assert_eq!(child.namespace(), Some(&Namespace::root()));
    }
}
