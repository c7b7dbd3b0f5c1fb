//! Selection and hashing of request headers for audit entries.

use std::collections::HashMap;

use crate::salt::Salt;

/// Decides which request headers reach an audit entry and how.
pub trait HeaderFormatter: Send + Sync {
    /// Return the headers to record. `salt` is `None` when raw logging is on.
    fn apply(
        &self,
        headers: &HashMap<String, Vec<String>>,
        salt: Option<&Salt>,
    ) -> HashMap<String, Vec<String>>;
}

/// Records only configured headers, optionally hashing their values.
///
/// Header names are matched case-insensitively and emitted lowercased.
#[derive(Debug, Clone, Default)]
pub struct AuditedHeaders {
    /// Lowercased header name -> whether its values are hashed.
    headers: HashMap<String, bool>,
}

impl AuditedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit `name`, hashing its values when `hmac` is set.
    pub fn with_header(mut self, name: &str, hmac: bool) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), hmac);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl HeaderFormatter for AuditedHeaders {
    fn apply(
        &self,
        headers: &HashMap<String, Vec<String>>,
        salt: Option<&Salt>,
    ) -> HashMap<String, Vec<String>> {
        let mut result = HashMap::new();

        for (name, values) in headers {
            let lower = name.to_ascii_lowercase();
            let Some(&hmac) = self.headers.get(&lower) else {
                continue;
            };

            let values = match (hmac, salt) {
                (true, Some(salt)) => values.iter().map(|v| salt.identified_hmac(v)).collect(),
                _ => values.clone(),
            };
            result.insert(lower, values);
        }

        result
    }
}
