//! Satchel Core Library
//!
//! This crate provides the pieces shared by every satchel component: the
//! hierarchical configuration resolver, the sanitized file value type, process
//! settings and the common error metadata.

pub mod config;
pub mod error;
pub mod sanitized_file;
pub mod settings;

// Re-export commonly used types
pub use config::{ConfigScope, ConfigValue, Configurator, LazyValue, ObjectRef};
pub use error::{ConfigError, ErrorMetadata, LogLevel};
pub use sanitized_file::{sanitize_filename, SanitizedFile, UploadedFile};
pub use settings::Settings;
