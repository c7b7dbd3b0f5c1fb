//! Formatter node turning audit records into serialized entries.

mod entry;
pub mod jsonx;

use async_trait::async_trait;
use std::sync::Arc;
use warden_core::{DeviceOptions, OutputFormat};

use crate::context::AuditContext;
use crate::error::AuditError;
use crate::event::Event;
use crate::headers::HeaderFormatter;
use crate::node::{Node, NodeType};
use crate::salt::Salter;

pub use entry::{Entry, EntryAuth, EntryNamespace, EntryRequest, EntryResponse};
use entry::EntryBuilder;

/// How entries are rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatterConfig {
    /// Skip all hashing.
    pub raw: bool,
    /// Hash token accessors along with tokens.
    pub hmac_accessor: bool,
    /// Replace list response `keys`/`key_info` with their sizes.
    pub elide_list_responses: bool,
    pub omit_time: bool,
    pub required_format: OutputFormat,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            raw: false,
            hmac_accessor: true,
            elide_list_responses: false,
            omit_time: false,
            required_format: OutputFormat::Json,
        }
    }
}

impl FormatterConfig {
    pub fn from_options(options: &DeviceOptions) -> Self {
        Self {
            raw: options.log_raw,
            hmac_accessor: options.hmac_accessor,
            elide_list_responses: options.elide_list_responses,
            omit_time: false,
            required_format: options.format,
        }
    }
}

/// Serializes the audit record of each event into the configured format.
///
/// The output is stored in [`Event::formatted`] under the format's name.
pub struct EntryFormatter {
    config: FormatterConfig,
    salter: Arc<dyn Salter>,
    header_formatter: Option<Arc<dyn HeaderFormatter>>,
    prefix: String,
}

impl EntryFormatter {
    pub fn new(config: FormatterConfig, salter: Arc<dyn Salter>) -> Self {
        Self {
            config,
            salter,
            header_formatter: None,
            prefix: String::new(),
        }
    }

    pub fn with_header_formatter(mut self, headers: Arc<dyn HeaderFormatter>) -> Self {
        self.header_formatter = Some(headers);
        self
    }

    /// Bytes written before every entry.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }

    fn render(&self, entry: &Entry) -> Result<Vec<u8>, AuditError> {
        let body = match self.config.required_format {
            OutputFormat::Json => serde_json::to_vec(entry)?,
            OutputFormat::Jsonx => {
                let value = serde_json::to_value(entry)?;
                jsonx::to_jsonx(&value).into_bytes()
            }
        };

        let mut out = Vec::with_capacity(self.prefix.len() + body.len());
        out.extend_from_slice(self.prefix.as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

#[async_trait]
impl Node for EntryFormatter {
    fn node_type(&self) -> NodeType {
        NodeType::Formatter
    }

    async fn process(
        &self,
        ctx: &AuditContext,
        event: Option<Event>,
    ) -> Result<Option<Event>, AuditError> {
        const OP: &str = "EntryFormatter::process";

        if ctx.is_cancelled() {
            return Err(AuditError::cancelled(OP));
        }

        let Some(mut event) = event else {
            return Err(AuditError::invalid_parameter(OP, "event is nil"));
        };

        let bytes = {
            let Some(record) = event.payload.as_audit() else {
                return Err(AuditError::invalid_parameter(OP, "cannot parse event payload"));
            };

            let Some(data) = record.data.as_ref() else {
                return Ok(None);
            };

            let salt = if self.config.raw {
                None
            } else {
                Some(
                    self.salter
                        .salt(ctx)
                        .await
                        .map_err(|e| e.context(OP, "unable to obtain salt"))?,
                )
            };

            let builder = EntryBuilder {
                config: &self.config,
                salt: salt.as_deref(),
                headers: self.header_formatter.as_deref(),
                namespace: ctx.namespace(),
            };
            let entry = builder.build(record, data);
            self.render(&entry)
                .map_err(|e| e.context(OP, "unable to serialize audit entry"))?
        };

        event
            .formatted
            .insert(self.config.required_format.as_str().to_string(), bytes);
        Ok(Some(event))
    }

    fn reopen(&self) -> Result<(), AuditError> {
        Ok(())
    }
}
