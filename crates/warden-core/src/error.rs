//! Error types for configuration parsing.

use thiserror::Error;

/// Errors that can occur while reading audit device configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A boolean option could not be parsed.
    #[error("unable to parse '{key}': invalid boolean value {value:?}")]
    InvalidBool { key: String, value: String },

    /// Neither `file_path` nor the legacy `path` option was supplied.
    #[error("file_path is required")]
    MissingFilePath,

    /// The file mode is not an octal permission string.
    #[error("unable to parse file mode {0:?}: expected an octal value such as 0600")]
    InvalidFileMode(String),

    /// The output format is not one we can produce.
    #[error("unsupported output format {0:?}")]
    InvalidFormat(String),

    /// YAML could not be parsed.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
