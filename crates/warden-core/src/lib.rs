//! Shared configuration types for the Warden audit crates.
//!
//! Audit devices arrive either as the raw string option map carried by an
//! enable request, or as YAML. Both forms end up as [`DeviceOptions`], which
//! the audit pipeline consumes without further parsing.

// Configuration types shared across all Warden crates
pub mod config;
pub mod error;

pub use config::{
    parse_bool, parse_file_mode, DeviceOptions, OutputFormat, SinkTarget, WardenConfig,
    DEFAULT_FILE_MODE, DISCARD, STDOUT,
};
pub use error::ConfigError;
