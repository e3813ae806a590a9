//! Keyed-table repositories.
//!
//! The editable variant keeps, per key, a baseline (last value known
//! to be persisted or loaded) and a working copy (the value under
//! edit). A key is modified iff the working copy's content hash
//! differs from the baseline hash, so a transiently mutated and
//! restored record reads as unchanged. Baselines are replaced only by
//! a load or a successful save.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::codec;
use crate::error::{DataError, DataResult};
use crate::model::{FieldValue, KeyedRecord, Trackable};
use crate::repository::{
    missing_file_is_empty, write_data_file, DataSource, EntryStatus, RepositoryStats,
};
use crate::tracking::{content_hash, ChangeNotifier, ContentHash, ObserverId};

/// Read-only table repository. Mutating calls return
/// [`DataError::UnsupportedOperation`] without side effects.
pub struct RuntimeTableRepository<R: KeyedRecord> {
    name: String,
    source: Option<DataSource>,
    state: RwLock<RuntimeState<R>>,
    init_lock: tokio::sync::Mutex<()>,
}

struct RuntimeState<R: KeyedRecord> {
    initialized: bool,
    generation: u64,
    records: HashMap<R::Key, R>,
}

impl<R: KeyedRecord> RuntimeTableRepository<R> {
    /// A repository backed by a data file.
    pub fn from_source<S: Into<String>>(name: S, source: DataSource) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
            state: RwLock::new(RuntimeState {
                initialized: false,
                generation: 0,
                records: HashMap::new(),
            }),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A pre-populated, sourceless repository. Already initialized;
    /// reloading reports an initialization error.
    pub fn with_records<S: Into<String>>(name: S, records: Vec<R>) -> Self {
        let records = records.into_iter().map(|r| (r.key(), r)).collect();
        Self {
            name: name.into(),
            source: None,
            state: RwLock::new(RuntimeState {
                initialized: true,
                generation: 1,
                records,
            }),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&DataSource> {
        self.source.as_ref()
    }

    /// Number of loads performed so far.
    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RuntimeState<R>> {
        self.state.read().expect("repository state lock poisoned")
    }

    async fn load_now(&self) -> DataResult<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| DataError::NotInitialized {
                name: self.name.clone(),
            })?;

        let text = missing_file_is_empty(
            tokio::fs::read_to_string(&source.path).await,
            &source.path,
        )?;
        let records = codec::decode_table::<R>(source.format, &source.source_id(), &text)?;

        let mut state = self.state.write().expect("repository state lock poisoned");
        state.records = records;
        state.initialized = true;
        state.generation += 1;
        debug!(
            "Loaded {} records into runtime table '{}'",
            state.records.len(),
            self.name
        );
        Ok(())
    }

    /// Replace the whole in-memory state from the configured source.
    pub async fn reload(&self) -> DataResult<()> {
        let _guard = self.init_lock.lock().await;
        self.load_now().await
    }

    async fn ensure_initialized(&self) -> DataResult<()> {
        <Self as super::TableRepo<R>>::initialize(self).await
    }

    pub fn stats(&self) -> RepositoryStats {
        let state = self.read_state();
        RepositoryStats {
            record_count: state.records.len(),
            dirty_count: 0,
            initialized: state.initialized,
        }
    }
}

impl<R: KeyedRecord> super::TableRepo<R> for RuntimeTableRepository<R> {
    async fn initialize(&self) -> DataResult<()> {
        if self.read_state().initialized {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.read_state().initialized {
            return Ok(());
        }
        self.load_now().await
    }

    async fn get(&self, key: &R::Key) -> DataResult<R> {
        self.ensure_initialized().await?;
        self.read_state()
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })
    }

    async fn try_get(&self, key: &R::Key) -> DataResult<Option<R>> {
        self.ensure_initialized().await?;
        Ok(self.read_state().records.get(key).cloned())
    }

    async fn get_all(&self) -> DataResult<Vec<R>> {
        self.ensure_initialized().await?;
        let mut records: Vec<R> = self.read_state().records.values().cloned().collect();
        records.sort_by_key(|r| r.key());
        Ok(records)
    }

    async fn find<P>(&self, predicate: P) -> DataResult<Vec<R>>
    where
        P: Fn(&R) -> bool + Send,
    {
        self.ensure_initialized().await?;
        let mut records: Vec<R> = self
            .read_state()
            .records
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.key());
        Ok(records)
    }

    fn contains(&self, key: &R::Key) -> bool {
        self.read_state().records.contains_key(key)
    }

    fn len(&self) -> usize {
        self.read_state().records.len()
    }

    fn is_initialized(&self) -> bool {
        self.read_state().initialized
    }

    fn insert(&self, _record: R) -> DataResult<()> {
        Err(DataError::UnsupportedOperation { operation: "insert" })
    }

    fn update(&self, _key: &R::Key, _record: R) -> DataResult<()> {
        Err(DataError::UnsupportedOperation { operation: "update" })
    }

    fn remove(&self, _key: &R::Key) -> DataResult<R> {
        Err(DataError::UnsupportedOperation { operation: "remove" })
    }

    async fn save(&self) -> DataResult<()> {
        Err(DataError::UnsupportedOperation { operation: "save" })
    }
}

/// One key's baseline/working pair.
struct Entry<R> {
    baseline: Option<R>,
    baseline_hash: Option<ContentHash>,
    working: Option<R>,
}

impl<R: KeyedRecord> Entry<R> {
    fn from_loaded(record: R, hash: ContentHash) -> Self {
        Self {
            baseline: Some(record.clone()),
            baseline_hash: Some(hash),
            working: Some(record),
        }
    }

    fn added(record: R) -> Self {
        Self {
            baseline: None,
            baseline_hash: None,
            working: Some(record),
        }
    }

    fn status(&self) -> EntryStatus {
        match (&self.baseline, &self.working) {
            (None, Some(_)) => EntryStatus::Added,
            (Some(_), None) => EntryStatus::Deleted,
            (None, None) => EntryStatus::Unchanged,
            (Some(_), Some(working)) => match (content_hash(working), self.baseline_hash) {
                (Ok(hash), Some(baseline)) if hash == baseline => EntryStatus::Unchanged,
                (Err(e), _) => {
                    warn!("Content hash failed, treating record as modified: {e}");
                    EntryStatus::Modified
                }
                _ => EntryStatus::Modified,
            },
        }
    }

    fn is_dirty(&self) -> bool {
        self.status() != EntryStatus::Unchanged
    }
}

struct EditState<R: KeyedRecord> {
    initialized: bool,
    generation: u64,
    entries: HashMap<R::Key, Entry<R>>,
}

impl<R: KeyedRecord> EditState<R> {
    fn any_dirty(&self) -> bool {
        self.entries.values().any(Entry::is_dirty)
    }

    fn live_count(&self) -> usize {
        self.entries.values().filter(|e| e.working.is_some()).count()
    }
}

/// Read/write table repository with baseline/working-copy change
/// tracking at both whole-record (content hash) and per-field
/// granularity.
pub struct EditableTableRepository<R: KeyedRecord> {
    name: String,
    source: Option<DataSource>,
    state: RwLock<EditState<R>>,
    init_lock: tokio::sync::Mutex<()>,
    dirty_notifier: ChangeNotifier<bool>,
}

impl<R: KeyedRecord> EditableTableRepository<R> {
    /// A repository backed by a data file.
    pub fn from_source<S: Into<String>>(name: S, source: DataSource) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
            state: RwLock::new(EditState {
                initialized: false,
                generation: 0,
                entries: HashMap::new(),
            }),
            init_lock: tokio::sync::Mutex::new(()),
            dirty_notifier: ChangeNotifier::new(),
        }
    }

    /// A sourceless, already-initialized repository. Save and reload
    /// report an initialization error.
    pub fn in_memory<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            source: None,
            state: RwLock::new(EditState {
                initialized: true,
                generation: 0,
                entries: HashMap::new(),
            }),
            init_lock: tokio::sync::Mutex::new(()),
            dirty_notifier: ChangeNotifier::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&DataSource> {
        self.source.as_ref()
    }

    /// Number of loads performed so far.
    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    /// Register a dirty-state observer. It fires with the new
    /// aggregate state exactly once per clean/dirty transition, never
    /// on writes that leave the aggregate unchanged.
    pub fn on_dirty_changed<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.dirty_notifier.subscribe(callback)
    }

    pub fn remove_dirty_observer(&self, id: ObserverId) -> bool {
        self.dirty_notifier.unsubscribe(id)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, EditState<R>> {
        self.state.read().expect("repository state lock poisoned")
    }

    /// Run `f` under the write lock and deliver a dirty-state
    /// notification if the aggregate flipped. The lock is released
    /// before observers run.
    fn mutate<T>(&self, f: impl FnOnce(&mut EditState<R>) -> T) -> T {
        let (result, before, after) = {
            let mut state = self.state.write().expect("repository state lock poisoned");
            let before = state.any_dirty();
            let result = f(&mut state);
            let after = state.any_dirty();
            (result, before, after)
        };
        if before != after {
            self.dirty_notifier.notify(&after);
        }
        result
    }

    fn require_source(&self) -> DataResult<&DataSource> {
        self.source.as_ref().ok_or_else(|| DataError::NotInitialized {
            name: self.name.clone(),
        })
    }

    fn require_initialized(&self) -> DataResult<()> {
        if self.read_state().initialized {
            Ok(())
        } else {
            Err(DataError::NotInitialized {
                name: self.name.clone(),
            })
        }
    }

    async fn load_now(&self) -> DataResult<()> {
        let source = self.require_source()?;
        let text = missing_file_is_empty(
            tokio::fs::read_to_string(&source.path).await,
            &source.path,
        )?;
        let records = codec::decode_table::<R>(source.format, &source.source_id(), &text)?;

        let mut entries = HashMap::with_capacity(records.len());
        for (key, record) in records {
            let hash = content_hash(&record)?;
            entries.insert(key, Entry::from_loaded(record, hash));
        }

        self.mutate(|state| {
            state.entries = entries;
            state.initialized = true;
            state.generation += 1;
        });
        debug!("Loaded table '{}' (generation {})", self.name, self.generation());
        Ok(())
    }

    /// Replace the whole in-memory state and baseline from the
    /// configured source. Failure leaves the previous state untouched.
    pub async fn reload(&self) -> DataResult<()> {
        let _guard = self.init_lock.lock().await;
        self.load_now().await
    }

    async fn ensure_initialized(&self) -> DataResult<()> {
        <Self as super::TableRepo<R>>::initialize(self).await
    }

    /// Clone of the current working copy under `key`.
    pub fn get_working_copy(&self, key: &R::Key) -> Option<R> {
        self.read_state()
            .entries
            .get(key)
            .and_then(|e| e.working.clone())
    }

    /// Mutate the working copy under `key` in place. Divergence is
    /// picked up by content-hash comparison; no explicit marking is
    /// needed afterwards.
    pub fn modify<F>(&self, key: &R::Key, f: F) -> DataResult<()>
    where
        F: FnOnce(&mut R),
    {
        self.mutate(|state| {
            let entry = state
                .entries
                .get_mut(key)
                .and_then(|e| e.working.as_mut())
                .ok_or_else(|| DataError::NotFound {
                    key: key.to_string(),
                })?;
            f(entry);
            Ok(())
        })
    }

    /// Record that the working copy under `key` was mutated through an
    /// external handle. With content-hash tracking the divergence is
    /// already observable; this re-evaluates the aggregate state and
    /// fires the observer if it flipped.
    pub fn mark_as_modified(&self, key: &R::Key) -> DataResult<()> {
        self.mutate(|state| {
            if state
                .entries
                .get(key)
                .map(|e| e.working.is_some())
                .unwrap_or(false)
            {
                Ok(())
            } else {
                Err(DataError::NotFound {
                    key: key.to_string(),
                })
            }
        })
    }

    /// Whether the working copy under `key` diverges from its
    /// baseline. False for unknown keys.
    pub fn has_unsaved_changes(&self, key: &R::Key) -> bool {
        self.read_state()
            .entries
            .get(key)
            .map(Entry::is_dirty)
            .unwrap_or(false)
    }

    /// Whether any key diverges from baseline.
    pub fn has_any_unsaved_changes(&self) -> bool {
        self.read_state().any_dirty()
    }

    /// Keys diverging from baseline, sorted.
    pub fn modified_keys(&self) -> Vec<R::Key> {
        let state = self.read_state();
        let mut keys: Vec<R::Key> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_dirty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Edit status of `key`, if the repository knows it.
    pub fn status(&self, key: &R::Key) -> Option<EntryStatus> {
        self.read_state().entries.get(key).map(Entry::status)
    }

    /// Discard all working-copy edits, restoring every baseline.
    /// Added-but-unsaved keys disappear entirely.
    pub fn revert(&self) {
        self.mutate(|state| {
            state.entries.retain(|_, e| e.baseline.is_some());
            for entry in state.entries.values_mut() {
                entry.working = entry.baseline.clone();
            }
        });
    }

    /// Discard working-copy edits for one key.
    pub fn revert_key(&self, key: &R::Key) -> DataResult<()> {
        self.mutate(|state| {
            let entry = state.entries.get_mut(key).ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })?;
            if entry.baseline.is_none() {
                state.entries.remove(key);
            } else {
                entry.working = entry.baseline.clone();
            }
            Ok(())
        })
    }

    /// Re-baseline one key from its current working copy without a
    /// reload. The key reads as unchanged afterwards.
    pub fn reset_baseline(&self, key: &R::Key) -> DataResult<()> {
        self.mutate(|state| {
            let entry = state.entries.get_mut(key).ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })?;
            match &entry.working {
                Some(working) => {
                    entry.baseline_hash = Some(content_hash(working)?);
                    entry.baseline = Some(working.clone());
                }
                None => {
                    state.entries.remove(key);
                }
            }
            Ok(())
        })
    }

    /// Re-baseline every key from its current working copy.
    pub fn reset_all_baselines(&self) -> DataResult<()> {
        self.mutate(|state| {
            let keys: Vec<R::Key> = state.entries.keys().cloned().collect();
            for key in keys {
                let entry = state.entries.get_mut(&key).expect("key just listed");
                match &entry.working {
                    Some(working) => {
                        entry.baseline_hash = Some(content_hash(working)?);
                        entry.baseline = Some(working.clone());
                    }
                    None => {
                        state.entries.remove(&key);
                    }
                }
            }
            Ok(())
        })
    }

    pub fn stats(&self) -> RepositoryStats {
        let state = self.read_state();
        RepositoryStats {
            record_count: state.live_count(),
            dirty_count: state.entries.values().filter(|e| e.is_dirty()).count(),
            initialized: state.initialized,
        }
    }

    fn render_for_save(&self, only_key: Option<&R::Key>) -> DataResult<(String, Vec<(R::Key, Option<ContentHash>)>)> {
        let source = self.require_source()?;
        let state = self.read_state();

        if let Some(key) = only_key {
            if !state.entries.contains_key(key) {
                return Err(DataError::NotFound {
                    key: key.to_string(),
                });
            }
        }

        let mut table: HashMap<R::Key, R> = HashMap::new();
        for (key, entry) in &state.entries {
            // For a single-key save every other entry is written from
            // its baseline so only that key's divergence is committed.
            let value = match only_key {
                Some(k) if k != key => entry.baseline.as_ref(),
                _ => entry.working.as_ref(),
            };
            if let Some(record) = value {
                table.insert(key.clone(), record.clone());
            }
        }

        let text = codec::encode_table::<R>(source.format, &source.source_id(), &table)?;

        // Fold targets and their hashes are fixed before any I/O so
        // the post-write baseline swap cannot fail.
        let mut folds = Vec::new();
        for (key, entry) in &state.entries {
            if let Some(k) = only_key {
                if k != key {
                    continue;
                }
            }
            let hash = match &entry.working {
                Some(working) => Some(content_hash(working)?),
                None => None,
            };
            folds.push((key.clone(), hash));
        }
        Ok((text, folds))
    }

    fn fold_baselines(&self, folds: Vec<(R::Key, Option<ContentHash>)>) {
        self.mutate(|state| {
            for (key, hash) in folds {
                let live = hash.is_some()
                    && state
                        .entries
                        .get(&key)
                        .map(|e| e.working.is_some())
                        .unwrap_or(false);
                if live {
                    if let Some(entry) = state.entries.get_mut(&key) {
                        entry.baseline = entry.working.clone();
                        entry.baseline_hash = hash;
                    }
                } else {
                    // Deleted key whose removal just hit the disk.
                    state.entries.remove(&key);
                }
            }
        });
    }

    /// Persist exactly one key's divergence; every other record is
    /// written from its baseline. The key reads as unchanged
    /// afterwards.
    pub async fn save_key(&self, key: &R::Key) -> DataResult<()> {
        self.require_initialized()?;
        let source_path = self.require_source()?.path.clone();
        let (text, folds) = self.render_for_save(Some(key))?;
        write_data_file(&source_path, &text).await?;
        self.fold_baselines(folds);
        debug!("Saved key '{key}' of table '{}'", self.name);
        Ok(())
    }
}

impl<R: KeyedRecord> super::TableRepo<R> for EditableTableRepository<R> {
    async fn initialize(&self) -> DataResult<()> {
        if self.read_state().initialized {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.read_state().initialized {
            return Ok(());
        }
        self.load_now().await
    }

    async fn get(&self, key: &R::Key) -> DataResult<R> {
        self.ensure_initialized().await?;
        self.get_working_copy(key).ok_or_else(|| DataError::NotFound {
            key: key.to_string(),
        })
    }

    async fn try_get(&self, key: &R::Key) -> DataResult<Option<R>> {
        self.ensure_initialized().await?;
        Ok(self.get_working_copy(key))
    }

    async fn get_all(&self) -> DataResult<Vec<R>> {
        self.ensure_initialized().await?;
        let mut records: Vec<R> = self
            .read_state()
            .entries
            .values()
            .filter_map(|e| e.working.clone())
            .collect();
        records.sort_by_key(|r| r.key());
        Ok(records)
    }

    async fn find<P>(&self, predicate: P) -> DataResult<Vec<R>>
    where
        P: Fn(&R) -> bool + Send,
    {
        self.ensure_initialized().await?;
        let mut records: Vec<R> = self
            .read_state()
            .entries
            .values()
            .filter_map(|e| e.working.as_ref())
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.key());
        Ok(records)
    }

    fn contains(&self, key: &R::Key) -> bool {
        self.read_state()
            .entries
            .get(key)
            .map(|e| e.working.is_some())
            .unwrap_or(false)
    }

    fn len(&self) -> usize {
        self.read_state().live_count()
    }

    fn is_initialized(&self) -> bool {
        self.read_state().initialized
    }

    fn insert(&self, record: R) -> DataResult<()> {
        self.require_initialized()?;
        let key = record.key();
        self.mutate(|state| match state.entries.get_mut(&key) {
            Some(entry) if entry.working.is_some() => Err(DataError::AlreadyExists {
                key: key.to_string(),
            }),
            Some(entry) => {
                // Re-adding a previously deleted key revives it; the
                // old baseline still governs its modified status.
                entry.working = Some(record);
                Ok(())
            }
            None => {
                state.entries.insert(key.clone(), Entry::added(record));
                Ok(())
            }
        })
    }

    fn update(&self, key: &R::Key, record: R) -> DataResult<()> {
        self.require_initialized()?;
        if record.key() != *key {
            return Err(DataError::config(format!(
                "Record identity '{}' does not match update key '{key}'",
                record.key()
            )));
        }
        self.mutate(|state| {
            let entry = state
                .entries
                .get_mut(key)
                .filter(|e| e.working.is_some())
                .ok_or_else(|| DataError::NotFound {
                    key: key.to_string(),
                })?;
            entry.working = Some(record);
            Ok(())
        })
    }

    fn remove(&self, key: &R::Key) -> DataResult<R> {
        self.require_initialized()?;
        self.mutate(|state| {
            let entry = state.entries.get_mut(key).ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })?;
            let removed = entry.working.take().ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })?;
            if entry.baseline.is_none() {
                // Added but never saved: no tombstone, the key simply
                // disappears.
                state.entries.remove(key);
            }
            Ok(removed)
        })
    }

    async fn save(&self) -> DataResult<()> {
        self.require_initialized()?;
        let source_path = self.require_source()?.path.clone();
        let (text, folds) = self.render_for_save(None)?;
        write_data_file(&source_path, &text).await?;
        self.fold_baselines(folds);
        debug!("Saved table '{}'", self.name);
        Ok(())
    }
}

impl<R: KeyedRecord + Trackable> EditableTableRepository<R> {
    /// Apply a tracked field write to the working copy under `key`,
    /// recording or clearing the per-field divergence against the
    /// baseline slot. Writing the original value back clears the
    /// divergence.
    pub fn track_property_change(
        &self,
        key: &R::Key,
        field: &str,
        value: FieldValue,
    ) -> DataResult<()> {
        let index = Self::field_index_checked(field)?;
        self.mutate(|state| {
            let entry = state.entries.get_mut(key).ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })?;
            let working = entry.working.as_mut().ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })?;
            if !working.apply_field(index, value.clone()) {
                return Err(DataError::config(format!(
                    "Field '{field}' rejected {} value",
                    value.type_name()
                )));
            }
            Ok(())
        })
    }

    /// Whether the tracked field `field` of `key` currently differs
    /// from its baseline value.
    pub fn is_property_modified(&self, key: &R::Key, field: &str) -> DataResult<bool> {
        let index = Self::field_index_checked(field)?;
        let state = self.read_state();
        let Some(entry) = state.entries.get(key) else {
            return Ok(false);
        };
        Ok(Self::field_diverges(entry, index))
    }

    /// Names of tracked fields of `key` diverging from baseline, in
    /// descriptor order.
    pub fn modified_properties(&self, key: &R::Key) -> Vec<&'static str> {
        let state = self.read_state();
        let Some(entry) = state.entries.get(key) else {
            return Vec::new();
        };
        R::tracked_fields()
            .iter()
            .filter(|d| Self::field_diverges(entry, d.index))
            .map(|d| d.name)
            .collect()
    }

    /// Baseline value of one tracked field. `None` when the key was
    /// added and has no baseline yet.
    pub fn property_baseline(
        &self,
        key: &R::Key,
        field: &str,
    ) -> DataResult<Option<FieldValue>> {
        let index = Self::field_index_checked(field)?;
        let state = self.read_state();
        let entry = state.entries.get(key).ok_or_else(|| DataError::NotFound {
            key: key.to_string(),
        })?;
        Ok(entry.baseline.as_ref().and_then(|b| b.field(index)))
    }

    /// Restore one tracked field of `key` to its baseline value,
    /// clearing that field's divergence only.
    pub fn revert_property(&self, key: &R::Key, field: &str) -> DataResult<()> {
        let index = Self::field_index_checked(field)?;
        self.mutate(|state| {
            let entry = state.entries.get_mut(key).ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })?;
            let baseline_value = entry.baseline.as_ref().and_then(|b| b.field(index));
            let Some(working) = entry.working.as_mut() else {
                return Err(DataError::NotFound {
                    key: key.to_string(),
                });
            };
            match baseline_value {
                Some(value) => {
                    working.apply_field(index, value);
                }
                None => {
                    debug!("No baseline for field '{field}' of added key '{key}', nothing to revert");
                }
            }
            Ok(())
        })
    }

    fn field_index_checked(field: &str) -> DataResult<usize> {
        R::field_index(field).ok_or_else(|| {
            DataError::config(format!(
                "'{field}' is not a tracked field of this record type"
            ))
        })
    }

    fn field_diverges(entry: &Entry<R>, index: usize) -> bool {
        match (&entry.baseline, &entry.working) {
            (Some(baseline), Some(working)) => baseline.field(index) != working.field(index),
            (None, Some(working)) => working.field(index).is_some(),
            _ => false,
        }
    }
}
