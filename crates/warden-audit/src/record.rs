//! Audit record types.
//!
//! An [`AuditRecord`] describes one request or response crossing the
//! platform. Its `data` may be absent, meaning there is nothing to audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Version stamped on every record produced by this crate.
pub const RECORD_VERSION: &str = "v0.1";

/// Identifier of the root namespace.
pub const ROOT_NAMESPACE_ID: &str = "root";

/// Whether the record describes the inbound request or the outbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Request,
    Response,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation performed by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Patch,
    Delete,
    List,
    Help,
    AliasLookahead,
    ResolveRole,
    Revoke,
    Renew,
    Rollback,
    Header,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Help => "help",
            Self::AliasLookahead => "alias-lookahead",
            Self::ResolveRole => "resolve-role",
            Self::Revoke => "revoke",
            Self::Renew => "renew",
            Self::Rollback => "rollback",
            Self::Header => "header",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant partition a request was made in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    /// Path relative to root, with a trailing slash. Empty for root.
    #[serde(default)]
    pub path: String,
}

impl Namespace {
    pub fn root() -> Self {
        Self {
            id: ROOT_NAMESPACE_ID.to_string(),
            path: String::new(),
        }
    }

    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_NAMESPACE_ID
    }

    /// Value exposed to filter expressions as `namespace`.
    pub fn filter_name(&self) -> &str {
        if self.is_root() { ROOT_NAMESPACE_ID } else { &self.path }
    }
}

/// Authentication details attached to a request or response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub client_token: String,
    pub accessor: String,
    pub display_name: String,
    pub policies: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub entity_id: String,
    pub token_type: String,
}

/// The inbound request being audited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub id: String,
    /// `None` when the operation was not recorded.
    pub operation: Option<Operation>,
    pub mount_type: String,
    pub mount_point: String,
    pub mount_accessor: String,
    pub path: String,
    pub client_id: String,
    pub client_token: String,
    pub client_token_accessor: String,
    pub remote_address: String,
    pub namespace: Option<Namespace>,
    pub data: Map<String, Value>,
    pub headers: HashMap<String, Vec<String>>,
}

/// The outbound response being audited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Response {
    pub mount_type: String,
    pub mount_point: String,
    pub mount_accessor: String,
    pub data: Map<String, Value>,
    pub warnings: Vec<String>,
    pub redirect: String,
}

/// Everything known about one request/response exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogInput {
    pub auth: Option<Auth>,
    pub request: Option<Request>,
    pub response: Option<Response>,
    pub outer_error: Option<String>,
    /// Request data keys logged without hashing.
    pub non_hmac_request_keys: Vec<String>,
    /// Response data keys logged without hashing.
    pub non_hmac_response_keys: Vec<String>,
}

impl LogInput {
    pub fn for_request(request: Request) -> Self {
        Self {
            request: Some(request),
            ..Default::default()
        }
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Namespace recorded on the request itself, if any.
    pub fn request_namespace(&self) -> Option<&Namespace> {
        self.request.as_ref().and_then(|r| r.namespace.as_ref())
    }

    /// Flatten the fields filter expressions may select on.
    pub fn filter_fields(&self, namespace: &Namespace) -> BTreeMap<&'static str, String> {
        let mut fields = BTreeMap::new();
        fields.insert("namespace", namespace.filter_name().to_string());

        // Without a request every request field is selectable but empty.
        let request = self.request.as_ref();
        let field = |f: fn(&Request) -> &str| request.map(f).unwrap_or_default().to_string();
        fields.insert(
            "operation",
            request
                .and_then(|r| r.operation)
                .map(|op| op.to_string())
                .unwrap_or_default(),
        );
        fields.insert("mount_type", field(|r| &r.mount_type));
        fields.insert("mount_point", field(|r| &r.mount_point));
        fields.insert("mount_accessor", field(|r| &r.mount_accessor));
        fields.insert("path", field(|r| &r.path));
        fields.insert("client_id", field(|r| &r.client_id));

        fields
    }
}

/// Typed payload carried by audit events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub timestamp: DateTime<Utc>,
    pub data: Option<LogInput>,
}

impl AuditRecord {
    /// A new record with no data attached.
    pub fn new(kind: RecordKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: RECORD_VERSION.to_string(),
            kind,
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: LogInput) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_fields() {
        let input = LogInput::for_request(Request {
            operation: Some(Operation::Create),
            mount_type: "kv".to_string(),
            mount_point: "secret/".to_string(),
            path: "secret/foo".to_string(),
            ..Default::default()
        });

        let fields = input.filter_fields(&Namespace::root());
        assert_eq!(fields["namespace"], "root");
        assert_eq!(fields["operation"], "create");
        assert_eq!(fields["mount_type"], "kv");
        assert_eq!(fields["mount_point"], "secret/");
        assert_eq!(fields["path"], "secret/foo");
        assert_eq!(fields["client_id"], "");
    }

    #[test]
    fn test_filter_fields_child_namespace_uses_path() {
        let input = LogInput::default();
        let fields = input.filter_fields(&Namespace::new("abc12", "team-a/"));
        assert_eq!(fields["namespace"], "team-a/");
    }

    #[test]
    fn test_filter_fields_without_request_are_empty() {
        let input = LogInput {
            response: Some(Response {
                mount_type: "kv".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let fields = input.filter_fields(&Namespace::root());
        for name in ["operation", "mount_type", "mount_point", "mount_accessor", "path", "client_id"] {
            assert_eq!(fields[name], "", "{name}");
        }
        assert_eq!(fields["namespace"], "root");
    }

    #[test]
    fn test_missing_operation_is_not_read() {
        let request: Request = serde_json::from_str(r#"{"mount_type": "kv"}"#).unwrap();
        assert_eq!(request.operation, None);

        let fields = LogInput::for_request(request).filter_fields(&Namespace::root());
        assert_eq!(fields["operation"], "");
    }

    #[test]
    fn test_operation_serde_names() {
        let json = serde_json::to_string(&Operation::AliasLookahead).unwrap();
        assert_eq!(json, "\"alias-lookahead\"");
        let op: Operation = serde_json::from_str("\"list\"").unwrap();
        assert_eq!(op, Operation::List);
    }

    #[test]
    fn test_new_record_has_no_data() {
        let record = AuditRecord::new(RecordKind::Request);
        assert!(record.data.is_none());
        assert_eq!(record.version, RECORD_VERSION);
        assert_eq!(record.kind.to_string(), "request");
    }
}
