//! Serialized shape of an audit entry and the hashing applied while building it.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::FormatterConfig;
use crate::headers::HeaderFormatter;
use crate::record::{AuditRecord, Auth, LogInput, Namespace, Operation, RecordKind, Request, Response};
use crate::salt::Salt;

#[derive(Debug, Serialize)]
pub struct Entry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<EntryAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<EntryRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<EntryResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EntryAuth {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub accessor: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub entity_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token_type: String,
}

#[derive(Debug, Serialize)]
pub struct EntryNamespace {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct EntryRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_point: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_accessor: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_token_accessor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<EntryNamespace>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_point: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_accessor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub redirect: String,
}

/// Inputs shared by every part of one entry.
pub(super) struct EntryBuilder<'a> {
    pub config: &'a FormatterConfig,
    /// `None` when logging raw.
    pub salt: Option<&'a Salt>,
    pub headers: Option<&'a dyn HeaderFormatter>,
    pub namespace: Option<&'a Namespace>,
}

impl EntryBuilder<'_> {
    pub fn build(&self, record: &AuditRecord, data: &LogInput) -> Entry {
        let time = (!self.config.omit_time).then(|| {
            record
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
        });

        let request = data.request.as_ref().map(|r| self.request(r, data));
        let response = match record.kind {
            RecordKind::Response => data.response.as_ref().map(|r| self.response(r, data)),
            RecordKind::Request => None,
        };

        Entry {
            time,
            kind: record.kind,
            auth: data.auth.as_ref().map(|a| self.auth(a)),
            request,
            response,
            error: data.outer_error.clone().filter(|e| !e.is_empty()),
        }
    }

    fn auth(&self, auth: &Auth) -> EntryAuth {
        EntryAuth {
            client_token: self.hash(&auth.client_token),
            accessor: self.hash_accessor(&auth.accessor),
            display_name: auth.display_name.clone(),
            policies: auth.policies.clone(),
            metadata: auth.metadata.clone(),
            entity_id: auth.entity_id.clone(),
            token_type: auth.token_type.clone(),
        }
    }

    fn request(&self, request: &Request, data: &LogInput) -> EntryRequest {
        let headers = self
            .headers
            .map(|h| h.apply(&request.headers, self.salt))
            .filter(|h| !h.is_empty());

        EntryRequest {
            id: request.id.clone(),
            operation: request.operation,
            mount_type: request.mount_type.clone(),
            mount_point: request.mount_point.clone(),
            mount_accessor: request.mount_accessor.clone(),
            client_id: request.client_id.clone(),
            client_token: self.hash(&request.client_token),
            client_token_accessor: self.hash_accessor(&request.client_token_accessor),
            namespace: self
                .namespace
                .or(request.namespace.as_ref())
                .map(|ns| EntryNamespace {
                    id: ns.id.clone(),
                    path: ns.path.clone(),
                }),
            path: request.path.clone(),
            data: self.data(&request.data, &data.non_hmac_request_keys, false),
            remote_address: request.remote_address.clone(),
            headers,
        }
    }

    fn response(&self, response: &Response, data: &LogInput) -> EntryResponse {
        let elide = self.config.elide_list_responses
            && data
                .request
                .as_ref()
                .is_some_and(|r| r.operation == Some(Operation::List));

        EntryResponse {
            mount_type: response.mount_type.clone(),
            mount_point: response.mount_point.clone(),
            mount_accessor: response.mount_accessor.clone(),
            data: self.data(&response.data, &data.non_hmac_response_keys, elide),
            warnings: response.warnings.clone(),
            redirect: response.redirect.clone(),
        }
    }

    fn data(
        &self,
        data: &Map<String, Value>,
        non_hmac_keys: &[String],
        elide: bool,
    ) -> Option<Map<String, Value>> {
        if data.is_empty() {
            return None;
        }

        let mut data = data.clone();
        if elide {
            elide_list_data(&mut data);
        }

        let Some(salt) = self.salt else {
            return Some(data);
        };

        let hashed = data
            .into_iter()
            .map(|(key, value)| {
                if non_hmac_keys.iter().any(|k| k == &key) {
                    (key, value)
                } else {
                    (key, hash_value(salt, value))
                }
            })
            .collect();
        Some(hashed)
    }

    fn hash(&self, value: &str) -> String {
        match self.salt {
            Some(salt) if !value.is_empty() => salt.identified_hmac(value),
            _ => value.to_string(),
        }
    }

    fn hash_accessor(&self, value: &str) -> String {
        if self.config.hmac_accessor {
            self.hash(value)
        } else {
            value.to_string()
        }
    }
}

/// Replace list results with their sizes.
fn elide_list_data(data: &mut Map<String, Value>) {
    if let Some(Value::Array(keys)) = data.get("keys") {
        let count = keys.len();
        data.insert("keys".to_string(), Value::from(count));
    }
    if let Some(Value::Object(info)) = data.get("key_info") {
        let count = info.len();
        data.insert("key_info".to_string(), Value::from(count));
    }
}

fn hash_value(salt: &Salt, value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(salt.identified_hmac(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| hash_value(salt, v)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, hash_value(salt, v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_elide_list_data() {
        let mut data = json!({
            "keys": ["a", "b", "c"],
            "key_info": {"a": {}, "b": {}},
            "other": ["x"],
        })
        .as_object()
        .cloned()
        .unwrap();

        elide_list_data(&mut data);
        assert_eq!(data["keys"], json!(3));
        assert_eq!(data["key_info"], json!(2));
        assert_eq!(data["other"], json!(["x"]));
    }

    #[test]
    fn test_elide_ignores_non_list_shapes() {
        let mut data = json!({"keys": "not-a-list"}).as_object().cloned().unwrap();
        elide_list_data(&mut data);
        assert_eq!(data["keys"], json!("not-a-list"));
    }
}
