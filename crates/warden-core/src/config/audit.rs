//! Audit device configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Reserved target meaning "write to the process console".
pub const STDOUT: &str = "stdout";

/// Reserved target meaning "accept and drop everything".
pub const DISCARD: &str = "discard";

/// Permissions applied to newly opened audit files when none are configured.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Output format produced by the formatter and expected by the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// JSON converted to XML.
    Jsonx,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonx => "jsonx",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonx" => Ok(Self::Jsonx),
            other => Err(ConfigError::InvalidFormat(other.to_string())),
        }
    }
}

/// Where a device writes its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Stdout,
    Discard,
    File(PathBuf),
}

impl SinkTarget {
    /// Classify a configured path, matching the reserved names case-insensitively.
    pub fn from_path(path: &str) -> Self {
        let trimmed = path.trim();
        if trimmed.eq_ignore_ascii_case(STDOUT) {
            Self::Stdout
        } else if trimmed.eq_ignore_ascii_case(DISCARD) {
            Self::Discard
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }
}

/// Options for a single audit device.
///
/// `filter` is kept as `Some` whenever the option was supplied, even if blank,
/// so the pipeline can reject a fallback device that names a filter at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOptions {
    /// Catch-all device receiving events no filtering device accepted.
    #[serde(default)]
    pub fallback: bool,

    /// Predicate deciding which events this device records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// File path, or one of the reserved values `stdout` / `discard`.
    #[serde(alias = "path")]
    pub file_path: String,

    /// Octal permission string for the audit file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default)]
    pub format: OutputFormat,

    /// Whether token accessors are hashed.
    #[serde(default = "default_true")]
    pub hmac_accessor: bool,

    /// Log sensitive values without hashing.
    #[serde(default)]
    pub log_raw: bool,

    /// Replace list response keys with their count.
    #[serde(default)]
    pub elide_list_responses: bool,

    /// String prepended to every entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl DeviceOptions {
    /// Options for a device writing to `file_path` with everything else defaulted.
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            fallback: false,
            filter: None,
            file_path: file_path.into(),
            mode: None,
            format: OutputFormat::default(),
            hmac_accessor: true,
            log_raw: false,
            elide_list_responses: false,
            prefix: None,
        }
    }

    /// Build options from the raw key/value map of an enable request.
    pub fn from_map(config: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let file_path = config
            .get("file_path")
            .or_else(|| config.get("path"))
            .ok_or(ConfigError::MissingFilePath)?;

        let mut opts = Self::new(file_path.clone());

        if let Some(raw) = config.get("fallback") {
            opts.fallback = parse_bool("fallback", raw)?;
        }
        if let Some(raw) = config.get("hmac_accessor") {
            opts.hmac_accessor = parse_bool("hmac_accessor", raw)?;
        }
        if let Some(raw) = config.get("log_raw") {
            opts.log_raw = parse_bool("log_raw", raw)?;
        }
        if let Some(raw) = config.get("elide_list_responses") {
            opts.elide_list_responses = parse_bool("elide_list_responses", raw)?;
        }
        if let Some(raw) = config.get("format") {
            opts.format = raw.parse()?;
        }
        if let Some(mode) = config.get("mode") {
            // Validate early; the sink re-parses the stored string.
            parse_file_mode(mode)?;
            opts.mode = Some(mode.clone());
        }

        opts.filter = config.get("filter").cloned();
        opts.prefix = config.get("prefix").cloned();

        Ok(opts)
    }

    /// The sink this device writes to.
    pub fn sink_target(&self) -> SinkTarget {
        SinkTarget::from_path(&self.file_path)
    }

    /// Parsed file mode. `None` means permissions are left untouched.
    pub fn file_mode(&self) -> Result<Option<u32>, ConfigError> {
        parse_file_mode(self.mode.as_deref().unwrap_or_default())
    }
}

fn default_true() -> bool {
    true
}

/// Parse a boolean flag using the usual set of spellings.
pub fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parse an octal file mode.
///
/// Blank input yields [`DEFAULT_FILE_MODE`]; an explicit zero yields `None`.
pub fn parse_file_mode(mode: &str) -> Result<Option<u32>, ConfigError> {
    let mode = mode.trim();
    if mode.is_empty() {
        return Ok(Some(DEFAULT_FILE_MODE));
    }

    let parsed = u32::from_str_radix(mode, 8)
        .map_err(|_| ConfigError::InvalidFileMode(mode.to_string()))?;
    if parsed > 0o7777 {
        return Err(ConfigError::InvalidFileMode(mode.to_string()));
    }

    Ok((parsed != 0).then_some(parsed))
}
