//! Configuration Error Types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A layer could not be read or parsed
    #[error("Failed to load configuration from {source_name}: {error}")]
    LoadError { source_name: String, error: String },

    /// Layers merged but the result does not fit the typed configuration
    #[error("Failed to deserialize configuration: {error}")]
    DeserializeError { error: String },

    /// The configuration directory does not exist
    #[error("Configuration directory not found: {path:?}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn load_error<S: Into<String>, E: std::fmt::Display>(source_name: S, error: E) -> Self {
        Self::LoadError {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    pub fn deserialize_error<E: std::fmt::Display>(error: E) -> Self {
        Self::DeserializeError {
            error: error.to_string(),
        }
    }

    pub fn invalid_value<F: Into<String>, V: ToString, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
