//! Pluggable serialization formats.
//!
//! Every format honors one contract: encode/decode a single record, and
//! encode/decode a keyed table. The format set is a closed enum picked
//! once when a data source is registered and matched explicitly
//! afterwards; there is no runtime format discovery beyond file
//! extension inference, and inference failure is a configuration error
//! rather than a silent fallback.
//!
//! Table convention (all formats): a table is written as a sequence of
//! records **sorted by key**. Records carry their own identity field,
//! so the map is rebuilt on load by indexing `record.key()`. A
//! duplicate key in the input is a format error. TOML cannot hold a
//! bare top-level sequence, so its sequence lives under a `records`
//! array-of-tables; YAML and JSON use a top-level sequence directly.

pub mod json;
pub mod toml;
pub mod yaml;

use std::collections::HashMap;
use std::path::Path;

use crate::error::{DataError, DataResult};
use crate::model::{KeyedRecord, Record};

/// The supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Yaml,
    Json,
    Toml,
}

impl DataFormat {
    /// Infer a format from a file extension. `yml`/`yaml`, `json`, and
    /// `toml` are recognized; anything else is a configuration error.
    pub fn from_extension(path: &Path) -> DataResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("yml") | Some("yaml") => Ok(DataFormat::Yaml),
            Some("json") => Ok(DataFormat::Json),
            Some("toml") => Ok(DataFormat::Toml),
            Some(other) => Err(DataError::config(format!(
                "No codec registered for extension '.{other}' ({})",
                path.display()
            ))),
            None => Err(DataError::config(format!(
                "Cannot infer data format for '{}': no file extension",
                path.display()
            ))),
        }
    }

    /// Canonical extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Yaml => "yml",
            DataFormat::Json => "json",
            DataFormat::Toml => "toml",
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataFormat::Yaml => "yaml",
            DataFormat::Json => "json",
            DataFormat::Toml => "toml",
        };
        write!(f, "{name}")
    }
}

/// Decode a single record from `text`.
pub fn decode_single<R: Record>(
    format: DataFormat,
    source_id: &str,
    text: &str,
) -> DataResult<R> {
    match format {
        DataFormat::Yaml => yaml::load_single(source_id, text),
        DataFormat::Json => json::load_single(source_id, text),
        DataFormat::Toml => toml::load_single(source_id, text),
    }
}

/// Encode a single record to text.
pub fn encode_single<R: Record>(
    format: DataFormat,
    source_id: &str,
    record: &R,
) -> DataResult<String> {
    match format {
        DataFormat::Yaml => yaml::save_single(source_id, record),
        DataFormat::Json => json::save_single(source_id, record),
        DataFormat::Toml => toml::save_single(source_id, record),
    }
}

/// Decode a keyed table from `text`, indexing records by their own
/// identity field.
pub fn decode_table<R: KeyedRecord>(
    format: DataFormat,
    source_id: &str,
    text: &str,
) -> DataResult<HashMap<R::Key, R>> {
    let records: Vec<R> = match format {
        DataFormat::Yaml => yaml::load_sequence(source_id, text)?,
        DataFormat::Json => json::load_sequence(source_id, text)?,
        DataFormat::Toml => toml::load_sequence(source_id, text)?,
    };

    let mut table = HashMap::with_capacity(records.len());
    for record in records {
        let key = record.key();
        if table.insert(key.clone(), record).is_some() {
            return Err(DataError::format_detail(
                source_id,
                format!("duplicate table key '{key}'"),
            ));
        }
    }
    Ok(table)
}

/// Encode a keyed table to text, sorted by key for deterministic
/// output.
pub fn encode_table<R: KeyedRecord>(
    format: DataFormat,
    source_id: &str,
    table: &HashMap<R::Key, R>,
) -> DataResult<String> {
    let mut records: Vec<&R> = table.values().collect();
    records.sort_by_key(|r| r.key());

    match format {
        DataFormat::Yaml => yaml::save_sequence(source_id, &records),
        DataFormat::Json => json::save_sequence(source_id, &records),
        DataFormat::Toml => toml::save_sequence(source_id, &records),
    }
}
