//! Asset-shaped repository: one data file per record, keyed by stable
//! [`AssetId`].
//!
//! Enumeration touches sidecars only, so large asset folders list in
//! bounded memory; record payloads load on demand and are cached.
//! Insert, delete, and rename persist immediately, since the file
//! pair is the authoritative state; payload edits go through the
//! usual working-copy/baseline discipline per asset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use tracing::{debug, warn};

use crate::asset::{
    remove_sidecar, resolve_metadata, sidecar_path, write_sidecar, AssetId, AssetMetadata,
    AssetSummary, SIDECAR_EXTENSION,
};
use crate::codec::{self, DataFormat};
use crate::error::{DataError, DataResult};
use crate::model::Record;
use crate::tracking::{content_hash, ContentHash};

struct AssetEntry {
    path: PathBuf,
    metadata: AssetMetadata,
}

struct LoadedAsset<R> {
    record: R,
    /// Hash of the last persisted payload; `None` when the cached
    /// record was never persisted in its current form.
    baseline_hash: Option<ContentHash>,
}

struct AssetState<R> {
    initialized: bool,
    generation: u64,
    entries: HashMap<AssetId, AssetEntry>,
    loaded: HashMap<AssetId, LoadedAsset<R>>,
}

/// Repository over a folder of asset files, each paired with a
/// `.tabmeta` sidecar carrying its stable identity.
pub struct AssetRepository<R: Record> {
    name: String,
    root: PathBuf,
    data_extension: String,
    format: DataFormat,
    state: RwLock<AssetState<R>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl<R: Record> std::fmt::Debug for AssetRepository<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRepository")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("data_extension", &self.data_extension)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl<R: Record> AssetRepository<R> {
    /// A repository over `root`, matching data files by `extension`
    /// (for example `yml`). The codec is inferred from the extension.
    pub fn new<S: Into<String>, P: Into<PathBuf>>(
        name: S,
        root: P,
        extension: &str,
    ) -> DataResult<Self> {
        let extension = extension.trim_start_matches('.').to_string();
        if extension.eq_ignore_ascii_case(SIDECAR_EXTENSION) {
            return Err(DataError::config(format!(
                "Asset data extension '.{extension}' collides with the sidecar extension"
            )));
        }
        let format = DataFormat::from_extension(Path::new(&format!("pattern.{extension}")))?;
        Ok(Self {
            name: name.into(),
            root: root.into(),
            data_extension: extension,
            format,
            state: RwLock::new(AssetState {
                initialized: false,
                generation: 0,
                entries: HashMap::new(),
                loaded: HashMap::new(),
            }),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    pub fn is_initialized(&self) -> bool {
        self.read_state().initialized
    }

    /// Number of known assets.
    pub fn len(&self) -> usize {
        self.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, AssetState<R>> {
        self.state.read().expect("repository state lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, AssetState<R>> {
        self.state.write().expect("repository state lock poisoned")
    }

    /// Scan the folder, resolving every data file's identity through
    /// its sidecar. Sidecar damage self-heals; orphan sidecars are
    /// ignored with a warning. Idempotent and coalescing like every
    /// repository initialize.
    pub async fn initialize(&self) -> DataResult<()> {
        if self.read_state().initialized {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.read_state().initialized {
            return Ok(());
        }
        self.scan_now().await
    }

    /// Re-scan the folder, dropping the payload cache.
    pub async fn reload(&self) -> DataResult<()> {
        let _guard = self.init_lock.lock().await;
        self.scan_now().await
    }

    async fn scan_now(&self) -> DataResult<()> {
        let mut entries = HashMap::new();

        match tokio::fs::read_dir(&self.root).await {
            Ok(mut dir) => {
                while let Some(dir_entry) = dir.next_entry().await? {
                    let path = dir_entry.path();
                    if !dir_entry.file_type().await?.is_file() {
                        continue;
                    }
                    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                        continue;
                    };
                    if ext.eq_ignore_ascii_case(SIDECAR_EXTENSION) {
                        if !sibling_data_exists(&path, &self.data_extension) {
                            warn!("Orphan sidecar {} has no data file, ignoring", path.display());
                        }
                        continue;
                    }
                    if !ext.eq_ignore_ascii_case(&self.data_extension) {
                        continue;
                    }
                    let metadata = resolve_metadata(&path).await?;
                    entries.insert(metadata.id, AssetEntry { path, metadata });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "Asset folder {} does not exist yet, starting empty",
                    self.root.display()
                );
            }
            Err(e) => return Err(e.into()),
        }

        let mut state = self.write_state();
        state.entries = entries;
        state.loaded.clear();
        state.initialized = true;
        state.generation += 1;
        debug!(
            "Scanned asset folder '{}': {} assets",
            self.name,
            state.entries.len()
        );
        Ok(())
    }

    /// Summaries of every known asset, sorted by display name. No
    /// payloads are deserialized.
    pub async fn list(&self) -> DataResult<Vec<AssetSummary>> {
        self.initialize().await?;
        let state = self.read_state();
        let mut summaries: Vec<AssetSummary> = state
            .entries
            .iter()
            .map(|(id, entry)| AssetSummary {
                id: *id,
                path: entry.path.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.metadata.name().cmp(b.metadata.name()));
        Ok(summaries)
    }

    /// Whether an asset with `id` is known.
    pub fn contains(&self, id: &AssetId) -> bool {
        self.read_state().entries.contains_key(id)
    }

    /// Metadata of one asset.
    pub fn metadata(&self, id: &AssetId) -> Option<AssetMetadata> {
        self.read_state().entries.get(id).map(|e| e.metadata.clone())
    }

    /// Fetch an asset's record, loading and caching the payload on
    /// first access.
    pub async fn get(&self, id: &AssetId) -> DataResult<R> {
        self.initialize().await?;

        if let Some(record) = self.try_get_loaded(id) {
            return Ok(record);
        }

        let path = {
            let state = self.read_state();
            state
                .entries
                .get(id)
                .map(|e| e.path.clone())
                .ok_or_else(|| DataError::NotFound { key: id.to_string() })?
        };

        let text = tokio::fs::read_to_string(&path).await?;
        let record =
            codec::decode_single::<R>(self.format, &path.display().to_string(), &text)?;
        let hash = content_hash(&record)?;

        let mut state = self.write_state();
        state.loaded.insert(
            *id,
            LoadedAsset {
                record: record.clone(),
                baseline_hash: Some(hash),
            },
        );
        Ok(record)
    }

    /// The cached record, if the payload was loaded before.
    pub fn try_get_loaded(&self, id: &AssetId) -> Option<R> {
        self.read_state().loaded.get(id).map(|l| l.record.clone())
    }

    /// Whether the payload for `id` is cached.
    pub fn is_loaded(&self, id: &AssetId) -> bool {
        self.read_state().loaded.contains_key(id)
    }

    /// Find the asset whose data file is `path`, as currently
    /// recorded. Absence is not an error.
    pub async fn get_by_path(&self, path: &Path) -> DataResult<Option<AssetSummary>> {
        self.initialize().await?;
        let state = self.read_state();
        Ok(state
            .entries
            .iter()
            .find(|(_, e)| e.path == path)
            .map(|(id, e)| AssetSummary {
                id: *id,
                path: e.path.clone(),
                metadata: e.metadata.clone(),
            }))
    }

    /// Find an asset by display name (or file stem when no display
    /// name is set). Absence is not an error.
    pub async fn get_by_name(&self, name: &str) -> DataResult<Option<AssetSummary>> {
        self.initialize().await?;
        let state = self.read_state();
        Ok(state
            .entries
            .iter()
            .find(|(_, e)| e.metadata.name() == name)
            .map(|(id, e)| AssetSummary {
                id: *id,
                path: e.path.clone(),
                metadata: e.metadata.clone(),
            }))
    }

    /// Create a new asset: write the data file and its sidecar, mint
    /// the identity, and cache the payload. `file_name` is relative to
    /// the repository folder and must carry the repository's data
    /// extension.
    pub async fn insert(&self, file_name: &str, record: &R) -> DataResult<AssetId> {
        self.initialize().await?;
        let path = self.data_path_for(file_name)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(DataError::AlreadyExists {
                key: file_name.to_string(),
            });
        }

        let text = codec::encode_single(self.format, &path.display().to_string(), record)?;
        let hash = content_hash(record)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, &text).await?;

        let metadata = AssetMetadata::minted(file_name, text.len() as u64, Utc::now());
        let id = metadata.id;
        if let Err(e) = write_sidecar(&path, &metadata).await {
            // Keep both-or-neither visible: roll the data file back
            // rather than leaving a half-created pair.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        let mut state = self.write_state();
        state.entries.insert(id, AssetEntry { path, metadata });
        state.loaded.insert(
            id,
            LoadedAsset {
                record: record.clone(),
                baseline_hash: Some(hash),
            },
        );
        debug!("Created asset {id} ({file_name}) in '{}'", self.name);
        Ok(id)
    }

    /// Replace the cached working copy for `id` without persisting.
    pub fn update_record(&self, id: &AssetId, record: R) -> DataResult<()> {
        let mut state = self.write_state();
        if !state.entries.contains_key(id) {
            return Err(DataError::NotFound { key: id.to_string() });
        }
        match state.loaded.get_mut(id) {
            Some(loaded) => loaded.record = record,
            None => {
                // Payload was never fetched; the record diverges until
                // saved.
                state.loaded.insert(
                    *id,
                    LoadedAsset {
                        record,
                        baseline_hash: None,
                    },
                );
            }
        }
        Ok(())
    }

    /// Whether the cached record for `id` diverges from the last
    /// persisted payload.
    pub fn has_unsaved_changes(&self, id: &AssetId) -> bool {
        let state = self.read_state();
        match state.loaded.get(id) {
            Some(loaded) => match (content_hash(&loaded.record), loaded.baseline_hash) {
                (Ok(hash), Some(baseline)) => hash != baseline,
                (Ok(_), None) => true,
                (Err(e), _) => {
                    warn!("Content hash failed, treating asset as modified: {e}");
                    true
                }
            },
            None => false,
        }
    }

    /// Persist the cached record for `id`, refreshing the sidecar's
    /// size and timestamp.
    pub async fn save_asset(&self, id: &AssetId) -> DataResult<()> {
        self.initialize().await?;
        let (path, record, mut metadata) = {
            let state = self.read_state();
            let entry = state
                .entries
                .get(id)
                .ok_or_else(|| DataError::NotFound { key: id.to_string() })?;
            let loaded = state
                .loaded
                .get(id)
                .ok_or_else(|| DataError::NotFound { key: id.to_string() })?;
            (entry.path.clone(), loaded.record.clone(), entry.metadata.clone())
        };

        let text = codec::encode_single(self.format, &path.display().to_string(), &record)?;
        let hash = content_hash(&record)?;
        tokio::fs::write(&path, &text).await?;

        metadata.size_bytes = text.len() as u64;
        metadata.modified_at = Utc::now();
        write_sidecar(&path, &metadata).await?;

        let mut state = self.write_state();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.metadata = metadata;
        }
        if let Some(loaded) = state.loaded.get_mut(id) {
            loaded.baseline_hash = Some(hash);
        }
        debug!("Saved asset {id} in '{}'", self.name);
        Ok(())
    }

    /// Edit an asset's metadata (category, tags, display name) and
    /// persist the sidecar.
    pub async fn update_metadata<F>(&self, id: &AssetId, f: F) -> DataResult<AssetMetadata>
    where
        F: FnOnce(&mut AssetMetadata),
    {
        self.initialize().await?;
        let (path, mut metadata) = {
            let state = self.read_state();
            let entry = state
                .entries
                .get(id)
                .ok_or_else(|| DataError::NotFound { key: id.to_string() })?;
            (entry.path.clone(), entry.metadata.clone())
        };

        f(&mut metadata);
        // Identity and recorded location are not editable through
        // this surface.
        metadata.id = *id;
        metadata.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        write_sidecar(&path, &metadata).await?;

        let mut state = self.write_state();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.metadata = metadata.clone();
        }
        Ok(metadata)
    }

    /// Delete the data file and its sidecar. Subsequent listings see
    /// neither; the identity is retired, never reassigned.
    pub async fn delete(&self, id: &AssetId) -> DataResult<()> {
        self.initialize().await?;
        let path = {
            let state = self.read_state();
            state
                .entries
                .get(id)
                .map(|e| e.path.clone())
                .ok_or_else(|| DataError::NotFound { key: id.to_string() })?
        };

        // Data file goes first: if the sidecar removal then fails, the
        // orphan sidecar is invisible to listings, so the pair still
        // reads as deleted.
        tokio::fs::remove_file(&path).await?;
        remove_sidecar(&path).await?;

        let mut state = self.write_state();
        state.entries.remove(id);
        state.loaded.remove(id);
        debug!("Deleted asset {id} from '{}'", self.name);
        Ok(())
    }

    /// Rename an asset's data file (sidecar moves with it). The
    /// identity never changes; `get_by_path` resolves the new path
    /// afterwards.
    pub async fn rename(&self, id: &AssetId, new_file_name: &str) -> DataResult<()> {
        self.initialize().await?;
        let new_path = self.data_path_for(new_file_name)?;
        if tokio::fs::try_exists(&new_path).await? {
            return Err(DataError::AlreadyExists {
                key: new_file_name.to_string(),
            });
        }

        let (old_path, mut metadata) = {
            let state = self.read_state();
            let entry = state
                .entries
                .get(id)
                .ok_or_else(|| DataError::NotFound { key: id.to_string() })?;
            (entry.path.clone(), entry.metadata.clone())
        };

        tokio::fs::rename(&old_path, &new_path).await?;
        match tokio::fs::rename(sidecar_path(&old_path), sidecar_path(&new_path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Sidecar missing while renaming asset {id}, rewriting");
            }
            Err(e) => return Err(e.into()),
        }

        metadata.file_name = new_file_name.to_string();
        write_sidecar(&new_path, &metadata).await?;

        let mut state = self.write_state();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.path = new_path;
            entry.metadata = metadata;
        }
        debug!("Renamed asset {id} to {new_file_name} in '{}'", self.name);
        Ok(())
    }

    fn data_path_for(&self, file_name: &str) -> DataResult<PathBuf> {
        let path = Path::new(file_name);
        if path.components().count() != 1 {
            return Err(DataError::config(format!(
                "Asset file name '{file_name}' must be a bare file name"
            )));
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !ext.eq_ignore_ascii_case(&self.data_extension) {
            return Err(DataError::config(format!(
                "Asset file name '{file_name}' must use the '.{}' extension",
                self.data_extension
            )));
        }
        Ok(self.root.join(file_name))
    }
}

fn sibling_data_exists(sidecar: &Path, data_extension: &str) -> bool {
    sidecar.with_extension(data_extension).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::Monster;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    async fn repo_with_assets(dir: &TempDir) -> AssetRepository<Monster> {
        let repo = AssetRepository::new("maps", dir.path(), "yml").unwrap();
        repo.insert("cave.yml", &Monster::new("cave", "Cave", 1))
            .await
            .unwrap();
        repo.insert("tower.yml", &Monster::new("tower", "Tower", 2))
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_sidecar_extension_collision_rejected() {
        let dir = TempDir::new().unwrap();
        let err = AssetRepository::<Monster>::new("maps", dir.path(), "tabmeta").unwrap_err();
        assert_matches!(err, DataError::Configuration { .. });
    }

    #[tokio::test]
    async fn test_insert_creates_pair_and_lists() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;

        assert!(dir.path().join("cave.yml").exists());
        assert!(dir.path().join("cave.tabmeta").exists());

        let summaries = repo.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].metadata.name(), "cave");
    }

    #[tokio::test]
    async fn test_identity_survives_rescan() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        let id = repo.get_by_name("cave").await.unwrap().unwrap().id;

        // A brand-new repository over the same folder resolves the
        // same identity from the sidecars.
        let repo2 = AssetRepository::<Monster>::new("maps", dir.path(), "yml").unwrap();
        let found = repo2.get_by_name("cave").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        drop(repo);
    }

    #[tokio::test]
    async fn test_get_loads_and_caches_payload() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        let id = repo.get_by_name("cave").await.unwrap().unwrap().id;

        // Fresh repository: payload not loaded until asked for.
        let repo2 = AssetRepository::<Monster>::new("maps", dir.path(), "yml").unwrap();
        repo2.initialize().await.unwrap();
        assert!(!repo2.is_loaded(&id));
        assert_eq!(repo2.try_get_loaded(&id), None);

        let record = repo2.get(&id).await.unwrap();
        assert_eq!(record.name, "Cave");
        assert!(repo2.is_loaded(&id));
        assert_eq!(repo2.try_get_loaded(&id).unwrap().name, "Cave");
    }

    #[tokio::test]
    async fn test_missing_sidecar_self_heals() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        drop(repo);
        std::fs::remove_file(dir.path().join("cave.tabmeta")).unwrap();

        let repo2 = AssetRepository::<Monster>::new("maps", dir.path(), "yml").unwrap();
        let summaries = repo2.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(dir.path().join("cave.tabmeta").exists());
    }

    #[tokio::test]
    async fn test_rename_keeps_identity_and_updates_path() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        let id = repo.get_by_name("cave").await.unwrap().unwrap().id;

        repo.rename(&id, "grotto.yml").await.unwrap();

        assert!(!dir.path().join("cave.yml").exists());
        assert!(dir.path().join("grotto.yml").exists());
        assert!(dir.path().join("grotto.tabmeta").exists());

        // Same identity, new path, also across a rescan.
        let found = repo
            .get_by_path(&dir.path().join("grotto.yml"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);

        repo.reload().await.unwrap();
        let found = repo
            .get_by_path(&dir.path().join("grotto.yml"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn test_delete_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        let id = repo.get_by_name("cave").await.unwrap().unwrap().id;

        repo.delete(&id).await.unwrap();
        assert!(!dir.path().join("cave.yml").exists());
        assert!(!dir.path().join("cave.tabmeta").exists());
        assert!(!repo.contains(&id));

        let summaries = repo.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test]
    async fn test_orphan_sidecar_is_ignored() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        drop(repo);
        std::fs::remove_file(dir.path().join("cave.yml")).unwrap();

        let repo2 = AssetRepository::<Monster>::new("maps", dir.path(), "yml").unwrap();
        let summaries = repo2.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].metadata.name(), "tower");
    }

    #[tokio::test]
    async fn test_edit_and_save_asset() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        let id = repo.get_by_name("cave").await.unwrap().unwrap().id;

        let mut record = repo.get(&id).await.unwrap();
        record.level = 9;
        repo.update_record(&id, record).unwrap();
        assert!(repo.has_unsaved_changes(&id));

        repo.save_asset(&id).await.unwrap();
        assert!(!repo.has_unsaved_changes(&id));

        let repo2 = AssetRepository::<Monster>::new("maps", dir.path(), "yml").unwrap();
        let id2 = repo2.get_by_name("cave").await.unwrap().unwrap().id;
        assert_eq!(repo2.get(&id2).await.unwrap().level, 9);
    }

    #[tokio::test]
    async fn test_update_metadata_persists() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        let id = repo.get_by_name("cave").await.unwrap().unwrap().id;

        repo.update_metadata(&id, |m| {
            m.category = "dungeon".to_string();
            m.tags.push("dark".to_string());
            m.display_name = Some("The Cave".to_string());
        })
        .await
        .unwrap();

        let repo2 = AssetRepository::<Monster>::new("maps", dir.path(), "yml").unwrap();
        let found = repo2.get_by_name("The Cave").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.metadata.category, "dungeon");
    }

    #[tokio::test]
    async fn test_insert_duplicate_file_name_rejected() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with_assets(&dir).await;
        let err = repo
            .insert("cave.yml", &Monster::new("c2", "C2", 1))
            .await
            .unwrap_err();
        assert_matches!(err, DataError::AlreadyExists { .. });
    }

    #[tokio::test]
    async fn test_missing_folder_initializes_empty() {
        let dir = TempDir::new().unwrap();
        let repo =
            AssetRepository::<Monster>::new("maps", dir.path().join("nowhere"), "yml").unwrap();
        let summaries = repo.list().await.unwrap();
        assert!(summaries.is_empty());
    }
}
