//! Dispatch of audit events across every registered device.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::backend::Backend;
use crate::context::AuditContext;
use crate::error::AuditError;
use crate::event::Event;
use crate::node::{run_chain, ChainOutcome};
use crate::record::{AuditRecord, LogInput, RecordKind};

/// Routes each audit event to all registered devices.
///
/// Regular devices all see every event. The fallback device, if any, sees
/// only events that no filtering device recorded.
#[derive(Default)]
pub struct Broker {
    backends: RwLock<BTreeMap<String, Arc<dyn Backend>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, backend: Arc<dyn Backend>) -> Result<(), AuditError> {
        let mut backends = self
            .backends
            .write()
            .map_err(|_| AuditError::LockPoisoned("broker"))?;

        let name = backend.name().to_string();
        if backends.contains_key(&name) {
            return Err(AuditError::DuplicateBackend(name));
        }
        if backend.is_fallback() {
            if let Some(existing) = backends.values().find(|b| b.is_fallback()) {
                return Err(AuditError::FallbackAlreadyRegistered {
                    existing: existing.name().to_string(),
                });
            }
        }

        tracing::info!(device = %name, fallback = backend.is_fallback(), "audit device registered");
        backends.insert(name, backend);
        Ok(())
    }

    pub fn deregister(&self, name: &str) -> Result<Arc<dyn Backend>, AuditError> {
        let mut backends = self
            .backends
            .write()
            .map_err(|_| AuditError::LockPoisoned("broker"))?;

        let backend = backends
            .remove(name)
            .ok_or_else(|| AuditError::UnknownBackend(name.to_string()))?;
        tracing::info!(device = %name, "audit device deregistered");
        Ok(backend)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.read().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends
            .read()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_fallback(&self) -> bool {
        self.backends
            .read()
            .map(|b| b.values().any(|backend| backend.is_fallback()))
            .unwrap_or(false)
    }

    pub async fn log_request(&self, ctx: &AuditContext, input: LogInput) -> Result<(), AuditError> {
        self.log(ctx, RecordKind::Request, input).await
    }

    pub async fn log_response(&self, ctx: &AuditContext, input: LogInput) -> Result<(), AuditError> {
        self.log(ctx, RecordKind::Response, input).await
    }

    async fn log(&self, ctx: &AuditContext, kind: RecordKind, input: LogInput) -> Result<(), AuditError> {
        let (regular, fallback) = self.snapshot()?;
        if regular.is_empty() && fallback.is_none() {
            return Ok(());
        }

        let event = Event::audit(AuditRecord::new(kind).with_data(input));
        let mut delivered = false;
        let mut delivered_by_filter = false;
        let mut failures = Vec::new();

        for backend in &regular {
            match run_chain(ctx, event.clone(), backend.node_ids(), backend.nodes()).await {
                Ok(ChainOutcome::Delivered) => {
                    delivered = true;
                    delivered_by_filter |= backend.has_filtering();
                }
                Ok(ChainOutcome::Dropped) => {
                    tracing::debug!(device = %backend.name(), %kind, "audit event not recorded by device");
                }
                Err(e) => {
                    tracing::warn!(device = %backend.name(), %kind, error = %e, "audit device failed");
                    failures.push((backend.name().to_string(), e));
                }
            }
        }

        if let Some(fallback) = fallback.filter(|_| !delivered_by_filter) {
            tracing::debug!(device = %fallback.name(), %kind, "routing audit event to fallback device");
            match run_chain(ctx, event, fallback.node_ids(), fallback.nodes()).await {
                Ok(ChainOutcome::Delivered) => delivered = true,
                Ok(ChainOutcome::Dropped) => {}
                Err(e) => {
                    tracing::warn!(device = %fallback.name(), %kind, error = %e, "fallback audit device failed");
                    failures.push((fallback.name().to_string(), e));
                }
            }
        }

        if delivered || failures.is_empty() {
            Ok(())
        } else {
            Err(AuditError::NotRecorded(failures))
        }
    }

    /// Regular devices, and the fallback device if one is registered.
    #[allow(clippy::type_complexity)]
    fn snapshot(&self) -> Result<(Vec<Arc<dyn Backend>>, Option<Arc<dyn Backend>>), AuditError> {
        let backends = self
            .backends
            .read()
            .map_err(|_| AuditError::LockPoisoned("broker"))?;

        let mut regular = Vec::with_capacity(backends.len());
        let mut fallback = None;
        for backend in backends.values() {
            if backend.is_fallback() {
                fallback = Some(Arc::clone(backend));
            } else {
                regular.push(Arc::clone(backend));
            }
        }
        Ok((regular, fallback))
    }

    /// Drop the cached salt of device `name`.
    pub async fn invalidate(&self, ctx: &AuditContext, name: &str) -> Result<(), AuditError> {
        let backend = self
            .get(name)
            .ok_or_else(|| AuditError::UnknownBackend(name.to_string()))?;
        backend.invalidate(ctx).await;
        Ok(())
    }

    /// Reopen the sink of device `name`.
    pub async fn reload(&self, ctx: &AuditContext, name: &str) -> Result<(), AuditError> {
        let backend = self
            .get(name)
            .ok_or_else(|| AuditError::UnknownBackend(name.to_string()))?;
        backend.reload(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, FileBackend};
    use crate::metrics::SinkMetrics;
    use crate::salt::{InmemSaltStorage, SaltConfig};
    use warden_core::{DeviceOptions, DISCARD};

    fn discard(name: &str, fallback: bool) -> Arc<dyn Backend> {
        let mut options = DeviceOptions::new(DISCARD);
        options.fallback = fallback;
        let config = BackendConfig {
            mount_path: name.to_string(),
            options,
            salt_config: SaltConfig::default(),
            salt_view: Arc::new(InmemSaltStorage::new()),
        };
        Arc::new(
            FileBackend::with_metrics(config, None, Arc::new(SinkMetrics::new().unwrap())).unwrap(),
        )
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let broker = Broker::new();
        broker.register(discard("a/", false)).unwrap();

        let err = broker.register(discard("a/", false)).unwrap_err();
        assert!(matches!(err, AuditError::DuplicateBackend(name) if name == "a/"));
    }

    #[test]
    fn test_register_single_fallback() {
        let broker = Broker::new();
        broker.register(discard("fb1/", true)).unwrap();
        assert!(broker.has_fallback());

        let err = broker.register(discard("fb2/", true)).unwrap_err();
        assert!(matches!(err, AuditError::FallbackAlreadyRegistered { existing } if existing == "fb1/"));

        broker.deregister("fb1/").unwrap();
        broker.register(discard("fb2/", true)).unwrap();
    }

    #[test]
    fn test_deregister_unknown() {
        let broker = Broker::new();
        assert!(matches!(
            broker.deregister("nope/"),
            Err(AuditError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_log_without_devices() {
        let broker = Broker::new();
        broker
            .log_request(&AuditContext::new(), LogInput::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_context_is_not_recorded() {
        let broker = Broker::new();
        broker.register(discard("a/", false)).unwrap();

        let ctx = AuditContext::new();
        ctx.cancel();
        let err = broker.log_request(&ctx, LogInput::default()).await.unwrap_err();
        assert!(matches!(err, AuditError::NotRecorded(ref failures) if failures.len() == 1));
        assert!(err.is_cancelled());
        assert!(!err.is_invalid_parameter());
    }

    #[tokio::test]
    async fn test_invalidate_and_reload_by_name() {
        let broker = Broker::new();
        broker.register(discard("a/", false)).unwrap();
        let ctx = AuditContext::new();

        broker.invalidate(&ctx, "a/").await.unwrap();
        broker.reload(&ctx, "a/").await.unwrap();
        assert!(matches!(
            broker.reload(&ctx, "b/").await,
            Err(AuditError::UnknownBackend(_))
        ));
    }
}
