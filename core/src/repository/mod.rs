//! Repository shapes and their shared contracts.
//!
//! Two file-backed shapes, keyed tables and zero-or-one singles, each
//! come in a read-only runtime variant and a read/write editable
//! variant sharing one trait per shape. Mutating calls on a runtime
//! variant return [`DataError::UnsupportedOperation`] as a value, never
//! touch state, and never panic, so one interface can hold either
//! variant while accidental writes to read-only data still fail fast.
//! A third shape, the asset repository, keys records by stable
//! [`crate::asset::AssetId`] with one file per record.

pub mod asset;
pub mod single;
pub mod table;

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::DataFormat;
use crate::error::DataResult;
use crate::model::KeyedRecord;

pub use asset::AssetRepository;
pub use single::{EditableSingleRepository, RuntimeSingleRepository};
pub use table::{EditableTableRepository, RuntimeTableRepository};

/// Where a repository's data lives on disk and how it is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    pub path: PathBuf,
    pub format: DataFormat,
}

impl DataSource {
    pub fn new<P: Into<PathBuf>>(path: P, format: DataFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Build a source inferring the format from the file extension.
    pub fn infer<P: Into<PathBuf>>(path: P) -> DataResult<Self> {
        let path = path.into();
        let format = DataFormat::from_extension(&path)?;
        Ok(Self { path, format })
    }

    /// Identifier used in codec error messages.
    pub fn source_id(&self) -> String {
        self.path.display().to_string()
    }
}

/// Per-key edit status of an editable repository entry, computed
/// against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

/// Lightweight repository counters, reported by [`stats`] methods and
/// the data context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryStats {
    /// Number of live records (working copies, deleted excluded).
    pub record_count: usize,
    /// Number of keys diverging from baseline.
    pub dirty_count: usize,
    /// Whether the initial load has happened.
    pub initialized: bool,
}

/// Read/write contract shared by runtime and editable table
/// repositories.
///
/// Reads trigger an implicit [`initialize`](TableRepo::initialize)
/// when the repository has not loaded yet. Mutations and
/// [`save`](TableRepo::save) succeed only on the editable variant.
#[allow(async_fn_in_trait)]
pub trait TableRepo<R: KeyedRecord>: Send + Sync {
    /// Perform the initial load. Idempotent; concurrent calls coalesce
    /// onto a single underlying load.
    fn initialize(&self) -> impl Future<Output = DataResult<()>> + Send;

    /// Fetch the record under `key`, reporting
    /// [`DataError::NotFound`](crate::error::DataError::NotFound) on
    /// absence.
    fn get(&self, key: &R::Key) -> impl Future<Output = DataResult<R>> + Send;

    /// Fetch the record under `key`; absence is `Ok(None)`.
    fn try_get(&self, key: &R::Key) -> impl Future<Output = DataResult<Option<R>>> + Send;

    /// All live records.
    fn get_all(&self) -> impl Future<Output = DataResult<Vec<R>>> + Send;

    /// All live records matching `predicate`.
    fn find<P>(&self, predicate: P) -> impl Future<Output = DataResult<Vec<R>>> + Send
    where
        P: Fn(&R) -> bool + Send;

    /// Whether a live record exists under `key`. False before
    /// initialization.
    fn contains(&self, key: &R::Key) -> bool;

    /// Number of live records. Zero before initialization.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_initialized(&self) -> bool;

    /// Insert a record keyed by its own identity field.
    fn insert(&self, record: R) -> DataResult<()>;

    /// Replace the record under `key`.
    fn update(&self, key: &R::Key, record: R) -> DataResult<()>;

    /// Remove the record under `key`, returning the removed value.
    fn remove(&self, key: &R::Key) -> DataResult<R>;

    /// Persist the repository to its configured source.
    fn save(&self) -> impl Future<Output = DataResult<()>> + Send;
}

/// Contract shared by runtime and editable single-record repositories.
#[allow(async_fn_in_trait)]
pub trait SingleRepo<R>: Send + Sync
where
    R: crate::model::Record,
{
    /// Perform the initial load. Idempotent; concurrent calls coalesce.
    fn initialize(&self) -> impl Future<Output = DataResult<()>> + Send;

    /// The held record, if any.
    fn get(&self) -> impl Future<Output = DataResult<Option<R>>> + Send;

    fn is_initialized(&self) -> bool;

    /// Whether a record is currently held. False before
    /// initialization.
    fn has_record(&self) -> bool;

    /// Replace the held record.
    fn set(&self, record: R) -> DataResult<()>;

    /// Drop the held record, returning it.
    fn clear(&self) -> DataResult<Option<R>>;

    /// Persist the repository to its configured source.
    fn save(&self) -> impl Future<Output = DataResult<()>> + Send;
}

pub(crate) fn missing_file_is_empty(
    result: std::io::Result<String>,
    path: &Path,
) -> DataResult<String> {
    match result {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Data file {} does not exist yet, starting empty", path.display());
            Ok(String::new())
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn write_data_file(path: &Path, text: &str) -> DataResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, text).await?;
    Ok(())
}
