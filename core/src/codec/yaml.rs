//! YAML codec.
//!
//! Tables are a top-level sequence of records; single records are a
//! top-level mapping.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DataError, DataResult};

/// Deserialize a single record.
pub fn load_single<R: DeserializeOwned>(source_id: &str, text: &str) -> DataResult<R> {
    serde_yaml::from_str(text).map_err(|e| DataError::from_yaml(source_id, e))
}

/// Serialize a single record.
pub fn save_single<R: Serialize>(source_id: &str, record: &R) -> DataResult<String> {
    serde_yaml::to_string(record).map_err(|e| DataError::from_yaml(source_id, e))
}

/// Deserialize a record sequence. An empty document is an empty
/// sequence, not an error.
pub fn load_sequence<R: DeserializeOwned>(source_id: &str, text: &str) -> DataResult<Vec<R>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(text).map_err(|e| DataError::from_yaml(source_id, e))
}

/// Serialize a record sequence.
pub fn save_sequence<T: Serialize>(source_id: &str, records: &[T]) -> DataResult<String> {
    serde_yaml::to_string(records).map_err(|e| DataError::from_yaml(source_id, e))
}
