//! Stable identity for file-backed records.
//!
//! Every asset data file is paired with a sidecar metadata file at the
//! same base name and the fixed `.tabmeta` extension. The sidecar
//! carries the asset's [`AssetId`], which survives renames and moves;
//! a missing or corrupt sidecar is repaired by minting a fresh id
//! rather than failing the listing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DataError, DataResult};

/// Extension of sidecar metadata files. Deliberately not `.meta` or
/// any other extension claimed by common tooling.
pub const SIDECAR_EXTENSION: &str = "tabmeta";

/// Stable 128-bit asset identity. Minted once per logical asset and
/// never reused after deletion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Mint a fresh identity.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AssetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Metadata persisted in an asset's sidecar file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Owning asset identity.
    pub id: AssetId,

    /// File name of the data file, relative to the repository folder,
    /// as recorded at the last sidecar write.
    pub file_name: String,

    /// Free-form category, e.g. "map" or "texture".
    pub category: String,

    /// Tags for organization and searching.
    pub tags: Vec<String>,

    /// Size of the data file in bytes at the last sidecar write.
    pub size_bytes: u64,

    /// Last-modified timestamp of the data file at the last sidecar
    /// write.
    pub modified_at: DateTime<Utc>,

    /// Optional human-readable name; falls back to the file stem.
    pub display_name: Option<String>,
}

impl AssetMetadata {
    /// Synthesize metadata for a data file with a freshly minted
    /// identity.
    pub fn minted(file_name: &str, size_bytes: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            id: AssetId::mint(),
            file_name: file_name.to_string(),
            category: String::new(),
            tags: Vec::new(),
            size_bytes,
            modified_at,
            display_name: None,
        }
    }

    /// Display name, falling back to the data file stem.
    pub fn name(&self) -> &str {
        match &self.display_name {
            Some(name) => name,
            None => Path::new(&self.file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&self.file_name),
        }
    }
}

/// Lightweight listing projection: identity plus metadata, no record
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSummary {
    pub id: AssetId,
    /// Absolute path of the data file.
    pub path: PathBuf,
    pub metadata: AssetMetadata,
}

/// Path of the sidecar belonging to `data_path`.
pub fn sidecar_path(data_path: &Path) -> PathBuf {
    data_path.with_extension(SIDECAR_EXTENSION)
}

/// Read and parse a sidecar. `Ok(None)` when the file does not exist;
/// a parse failure is reported so the caller can self-heal.
pub async fn read_sidecar(data_path: &Path) -> DataResult<Option<AssetMetadata>> {
    let path = sidecar_path(data_path);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let metadata = serde_yaml::from_str(&text)
        .map_err(|e| DataError::from_yaml(&path.display().to_string(), e))?;
    Ok(Some(metadata))
}

/// Write (or overwrite) the sidecar belonging to `data_path`.
pub async fn write_sidecar(data_path: &Path, metadata: &AssetMetadata) -> DataResult<()> {
    let path = sidecar_path(data_path);
    let text = serde_yaml::to_string(metadata)
        .map_err(|e| DataError::from_yaml(&path.display().to_string(), e))?;
    tokio::fs::write(&path, text).await?;
    Ok(())
}

/// Remove the sidecar belonging to `data_path`, tolerating an already
/// missing file.
pub async fn remove_sidecar(data_path: &Path) -> DataResult<()> {
    let path = sidecar_path(data_path);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Load the metadata for `data_path`, minting and persisting a fresh
/// identity when the sidecar is missing or corrupt. Never fails a
/// listing because of sidecar damage; only I/O errors on the data file
/// itself propagate.
pub async fn resolve_metadata(data_path: &Path) -> DataResult<AssetMetadata> {
    match read_sidecar(data_path).await {
        Ok(Some(mut metadata)) => {
            // Keep the recorded path current; an externally moved pair
            // re-resolves by its new location on the next listing.
            let file_name = data_file_name(data_path);
            if metadata.file_name != file_name {
                debug!(
                    "Sidecar for {} recorded name '{}', updating to '{}'",
                    data_path.display(),
                    metadata.file_name,
                    file_name
                );
                metadata.file_name = file_name;
                write_sidecar(data_path, &metadata).await?;
            }
            Ok(metadata)
        }
        Ok(None) => {
            debug!("No sidecar for {}, minting a fresh identity", data_path.display());
            mint_and_persist(data_path).await
        }
        Err(e) => {
            warn!(
                "Corrupt sidecar for {} ({e}), minting a fresh identity",
                data_path.display()
            );
            mint_and_persist(data_path).await
        }
    }
}

async fn mint_and_persist(data_path: &Path) -> DataResult<AssetMetadata> {
    let fs_meta = tokio::fs::metadata(data_path).await?;
    let modified_at = fs_meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let metadata = AssetMetadata::minted(&data_file_name(data_path), fs_meta.len(), modified_at);
    write_sidecar(data_path, &metadata).await?;
    Ok(metadata)
}

fn data_file_name(data_path: &Path) -> String {
    data_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
