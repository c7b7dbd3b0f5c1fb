//! The envelope passed between pipeline nodes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

use crate::record::AuditRecord;

/// Classification of events a backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventType {
    Audit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event carries. Only [`Payload::Audit`] is understood by audit nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Audit(Box<AuditRecord>),
    Opaque(serde_json::Value),
}

impl Payload {
    pub fn as_audit(&self) -> Option<&AuditRecord> {
        match self {
            Self::Audit(record) => Some(record),
            _ => None,
        }
    }
}

/// An event flowing through a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
    /// Serialized forms keyed by format name, filled in by formatters.
    pub formatted: HashMap<String, Vec<u8>>,
    pub payload: Payload,
}

impl Event {
    pub fn new(payload: Payload) -> Self {
        Self {
            event_type: EventType::Audit,
            created_at: Utc::now(),
            formatted: HashMap::new(),
            payload,
        }
    }

    /// An audit event wrapping `record`.
    pub fn audit(record: AuditRecord) -> Self {
        Self::new(Payload::Audit(Box::new(record)))
    }

    pub fn format(&self, name: &str) -> Option<&[u8]> {
        self.formatted.get(name).map(Vec::as_slice)
    }
}
