//! Error types for the Tabula core engine.
//!
//! One taxonomy covers the whole crate: repository access, codec
//! failures, lock conflicts, and registration problems. Absent values
//! (a missing optional field, an unset reference) are `Option`s, never
//! errors.

use thiserror::Error;

/// Errors reported by repositories, codecs, the lock service, and the
/// data context.
#[derive(Error, Debug)]
pub enum DataError {
    /// A direct get-by-key call that does not tolerate absence found no
    /// record under `key`.
    #[error("Record not found: {key}")]
    NotFound { key: String },

    /// An insert collided with a live record under the same key.
    #[error("Record already exists: {key}")]
    AlreadyExists { key: String },

    /// A codec failed to parse or produce text. `source_id` names the
    /// file or data set involved; `position` carries a line/column hint
    /// when the underlying codec provides one. The hint is folded into
    /// `detail` at construction so the display stays one line.
    #[error("Format error in {source_id}: {detail}")]
    Format {
        source_id: String,
        detail: String,
        position: Option<String>,
    },

    /// A mutation was attempted on a read-only repository.
    #[error("Unsupported operation on read-only repository: {operation}")]
    UnsupportedOperation { operation: &'static str },

    /// Acquire or refresh was denied because another live holder owns
    /// the lease.
    #[error("Lock on '{resource}' is held by '{holder}'")]
    LockConflict { resource: String, holder: String },

    /// A repository was used without a configured data source, or
    /// mutated before its first load.
    #[error("Repository '{name}' is not initialized")]
    NotInitialized { name: String },

    /// Registration or lookup problem: no codec for a path, duplicate
    /// data-set name, or a reference whose target repository is not
    /// registered.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the crate.
pub type DataResult<T> = Result<T, DataError>;

impl DataError {
    fn format_error(source_id: &str, detail: String, position: Option<String>) -> Self {
        let detail = match &position {
            Some(p) => format!("{detail} ({p})"),
            None => detail,
        };
        DataError::Format {
            source_id: source_id.to_string(),
            detail,
            position,
        }
    }

    /// Build a [`DataError::Format`] from a YAML error, keeping the
    /// codec's location hint when present.
    pub fn from_yaml(source_id: &str, err: serde_yaml::Error) -> Self {
        let position = err
            .location()
            .map(|loc| format!("line {}, column {}", loc.line(), loc.column()));
        Self::format_error(source_id, err.to_string(), position)
    }

    /// Build a [`DataError::Format`] from a JSON error.
    pub fn from_json(source_id: &str, err: serde_json::Error) -> Self {
        let position = if err.line() > 0 {
            Some(format!("line {}, column {}", err.line(), err.column()))
        } else {
            None
        };
        Self::format_error(source_id, err.to_string(), position)
    }

    /// Build a [`DataError::Format`] from a TOML deserialization error.
    pub fn from_toml_de(source_id: &str, err: toml::de::Error) -> Self {
        let position = err
            .span()
            .map(|span| format!("byte range {}..{}", span.start, span.end));
        Self::format_error(source_id, err.message().to_string(), position)
    }

    /// Build a [`DataError::Format`] from a TOML serialization error.
    pub fn from_toml_ser(source_id: &str, err: toml::ser::Error) -> Self {
        Self::format_error(source_id, err.to_string(), None)
    }

    /// Build a [`DataError::Format`] with an explicit detail message,
    /// for structural problems such as duplicate table keys.
    pub fn format_detail<S: Into<String>>(source_id: &str, detail: S) -> Self {
        Self::format_error(source_id, detail.into(), None)
    }

    /// Shorthand for a [`DataError::Configuration`].
    pub fn config<S: Into<String>>(message: S) -> Self {
        DataError::Configuration {
            message: message.into(),
        }
    }
}
