//! TOML codec.
//!
//! TOML has no bare top-level sequence, so a table serializes its
//! records under a `records` array-of-tables; single records are the
//! top-level table itself.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, DataResult};

#[derive(Serialize)]
struct RowsRef<'a, T: Serialize> {
    records: &'a [T],
}

#[derive(Deserialize)]
#[serde(bound = "R: DeserializeOwned")]
struct Rows<R> {
    #[serde(default = "Vec::new")]
    records: Vec<R>,
}

/// Deserialize a single record.
pub fn load_single<R: DeserializeOwned>(source_id: &str, text: &str) -> DataResult<R> {
    toml::from_str(text).map_err(|e| DataError::from_toml_de(source_id, e))
}

/// Serialize a single record.
pub fn save_single<R: Serialize>(source_id: &str, record: &R) -> DataResult<String> {
    toml::to_string(record).map_err(|e| DataError::from_toml_ser(source_id, e))
}

/// Deserialize a record sequence from the `records` array-of-tables.
/// An empty document is an empty sequence, not an error.
pub fn load_sequence<R: DeserializeOwned>(source_id: &str, text: &str) -> DataResult<Vec<R>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rows: Rows<R> = toml::from_str(text).map_err(|e| DataError::from_toml_de(source_id, e))?;
    Ok(rows.records)
}

/// Serialize a record sequence under the `records` array-of-tables.
pub fn save_sequence<T: Serialize>(source_id: &str, records: &[T]) -> DataResult<String> {
    toml::to_string(&RowsRef { records }).map_err(|e| DataError::from_toml_ser(source_id, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        title: String,
        max_players: u32,
        motd: Option<String>,
    }

    #[test]
    fn test_single_round_trip() {
        let settings = Settings {
            title: "Dungeon".to_string(),
            max_players: 8,
            motd: None,
        };
        let text = save_single("settings.toml", &settings).unwrap();
        let back: Settings = load_single("settings.toml", &text).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_sequence_uses_array_of_tables() {
        let rows = vec![
            Settings {
                title: "A".to_string(),
                max_players: 2,
                motd: None,
            },
            Settings {
                title: "B".to_string(),
                max_players: 4,
                motd: Some("hi".to_string()),
            },
        ];
        let text = save_sequence("servers.toml", &rows).unwrap();
        assert!(text.contains("[[records]]"));

        let back: Vec<Settings> = load_sequence("servers.toml", &text).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_empty_document_is_empty_sequence() {
        let rows: Vec<Settings> = load_sequence("servers.toml", "").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_parse_error_reports_source() {
        let err = load_single::<Settings>("settings.toml", "title = ").unwrap_err();
        assert!(err.to_string().contains("settings.toml"));
    }
}
