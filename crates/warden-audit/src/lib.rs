//! # warden-audit
//!
//! Audit devices for the Warden secrets platform.
//!
//! Every configured device is a [`Backend`]: an ordered pipeline of nodes that
//! each audit event passes through before it is persisted.
//!
//! ```text
//! [filter] -> formatter -> sink (timed + counted)
//! ```
//!
//! - The optional **filter** evaluates a boolean expression against the
//!   record and silently drops events that do not match.
//! - The **formatter** hashes sensitive values with the device's salt and
//!   serializes the entry.
//! - The **sink** writes the bytes to a file, stdout, or nowhere.
//!
//! A node returns `Ok(Some(event))` to continue, `Ok(None)` to stop quietly,
//! and `Err(_)` to abort the pipeline for that event.
//!
//! A fallback device catches everything no filtering device recorded, so it
//! may never carry a filter itself. The [`Broker`] applies that routing.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_audit::{
//!     AuditContext, Backend, BackendConfig, FileBackend, InmemSaltStorage, LogInput,
//!     Namespace, Operation, Request, SaltConfig,
//! };
//! use warden_core::DeviceOptions;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut options = DeviceOptions::new("/var/log/warden/audit.log");
//! options.filter = Some("mount_type == kv".to_string());
//!
//! let backend = FileBackend::new(
//!     BackendConfig {
//!         mount_path: "file/".to_string(),
//!         options,
//!         salt_config: SaltConfig::default(),
//!         salt_view: Arc::new(InmemSaltStorage::new()),
//!     },
//!     None,
//! )?;
//!
//! let ctx = AuditContext::new().with_namespace(Namespace::root());
//! let input = LogInput::for_request(Request {
//!     operation: Some(Operation::Create),
//!     mount_type: "kv".to_string(),
//!     ..Default::default()
//! });
//! backend.log_test_message(&ctx, input).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod broker;
pub mod context;
pub mod error;
pub mod event;
pub mod expression;
pub mod filter;
pub mod formatter;
pub mod headers;
pub mod metrics;
pub mod node;
pub mod record;
pub mod salt;
pub mod sink;

pub use backend::{Backend, BackendConfig, FileBackend};
pub use broker::Broker;
pub use context::AuditContext;
pub use error::AuditError;
pub use event::{Event, EventType, Payload};
pub use expression::{Datum, Expression, ExpressionError};
pub use filter::EntryFilter;
pub use formatter::{EntryFormatter, FormatterConfig};
pub use headers::{AuditedHeaders, HeaderFormatter};
pub use metrics::{FallbackLabeler, Labeler, MetricsCounter, SinkLabeler, SinkMetricTimer, SinkMetrics};
pub use node::{process_manual, run_chain, ChainOutcome, Node, NodeId, NodeMap, NodeType};
pub use record::{Auth, AuditRecord, LogInput, Namespace, Operation, RecordKind, Request, Response};
pub use salt::{InmemSaltStorage, Salt, SaltCache, SaltConfig, SaltStorage, Salter};
pub use sink::{FileSink, NoopSink, StdoutSink};
