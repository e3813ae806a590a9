//! Zero-or-one record repositories.
//!
//! Same baseline/working-copy discipline as the table shape, narrowed
//! to a single keyless slot. Property tracking compares against the
//! baseline record directly.

use std::sync::RwLock;

use tracing::debug;

use crate::codec;
use crate::error::{DataError, DataResult};
use crate::model::{FieldValue, Record, Trackable};
use crate::repository::{
    missing_file_is_empty, write_data_file, DataSource, RepositoryStats,
};
use crate::tracking::{content_hash, ChangeNotifier, ContentHash, ObserverId};

/// Read-only single-record repository.
pub struct RuntimeSingleRepository<R: Record> {
    name: String,
    source: Option<DataSource>,
    state: RwLock<SingleState<R>>,
    init_lock: tokio::sync::Mutex<()>,
}

struct SingleState<R> {
    initialized: bool,
    generation: u64,
    baseline: Option<R>,
    baseline_hash: Option<ContentHash>,
    working: Option<R>,
}

impl<R> SingleState<R>
where
    R: Record,
{
    fn empty(initialized: bool) -> Self {
        Self {
            initialized,
            generation: 0,
            baseline: None,
            baseline_hash: None,
            working: None,
        }
    }

    fn is_dirty(&self) -> bool {
        match (&self.baseline, &self.working) {
            (None, None) => false,
            (None, Some(_)) | (Some(_), None) => true,
            (Some(_), Some(working)) => match (content_hash(working), self.baseline_hash) {
                (Ok(hash), Some(baseline)) => hash != baseline,
                _ => true,
            },
        }
    }
}

impl<R: Record> RuntimeSingleRepository<R> {
    pub fn from_source<S: Into<String>>(name: S, source: DataSource) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
            state: RwLock::new(SingleState::empty(false)),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&DataSource> {
        self.source.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SingleState<R>> {
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
        let record = if text.trim().is_empty() {
            None
        } else {
            Some(codec::decode_single::<R>(
                source.format,
                &source.source_id(),
                &text,
            )?)
        };
        let hash = match &record {
            Some(r) => Some(content_hash(r)?),
            None => None,
        };

        let mut state = self.state.write().expect("repository state lock poisoned");
        state.baseline = record.clone();
        state.baseline_hash = hash;
        state.working = record;
        state.initialized = true;
        state.generation += 1;
        debug!("Loaded single '{}' (generation {})", self.name, state.generation);
        Ok(())
    }

    pub async fn reload(&self) -> DataResult<()> {
        let _guard = self.init_lock.lock().await;
        self.load_now().await
    }

    pub fn stats(&self) -> RepositoryStats {
        let state = self.read_state();
        RepositoryStats {
            record_count: usize::from(state.working.is_some()),
            dirty_count: 0,
            initialized: state.initialized,
        }
    }
}

impl<R: Record> super::SingleRepo<R> for RuntimeSingleRepository<R> {
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

    async fn get(&self) -> DataResult<Option<R>> {
        self.initialize().await?;
        Ok(self.read_state().working.clone())
    }

    fn is_initialized(&self) -> bool {
        self.read_state().initialized
    }

    fn has_record(&self) -> bool {
        self.read_state().working.is_some()
    }

    fn set(&self, _record: R) -> DataResult<()> {
        Err(DataError::UnsupportedOperation { operation: "set" })
    }

    fn clear(&self) -> DataResult<Option<R>> {
        Err(DataError::UnsupportedOperation { operation: "clear" })
    }

    async fn save(&self) -> DataResult<()> {
        Err(DataError::UnsupportedOperation { operation: "save" })
    }
}

/// Read/write single-record repository with baseline/working-copy
/// change tracking.
pub struct EditableSingleRepository<R: Record> {
    name: String,
    source: Option<DataSource>,
    state: RwLock<SingleState<R>>,
    init_lock: tokio::sync::Mutex<()>,
    dirty_notifier: ChangeNotifier<bool>,
}

impl<R: Record> EditableSingleRepository<R> {
    pub fn from_source<S: Into<String>>(name: S, source: DataSource) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
            state: RwLock::new(SingleState::empty(false)),
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
            state: RwLock::new(SingleState::empty(true)),
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

    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    /// Register a dirty-state observer; fires once per aggregate
    /// transition.
    pub fn on_dirty_changed<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.dirty_notifier.subscribe(callback)
    }

    pub fn remove_dirty_observer(&self, id: ObserverId) -> bool {
        self.dirty_notifier.unsubscribe(id)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SingleState<R>> {
        self.state.read().expect("repository state lock poisoned")
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut SingleState<R>) -> T) -> T {
        let (result, before, after) = {
            let mut state = self.state.write().expect("repository state lock poisoned");
            let before = state.is_dirty();
            let result = f(&mut state);
            let after = state.is_dirty();
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
        let record = if text.trim().is_empty() {
            None
        } else {
            Some(codec::decode_single::<R>(
                source.format,
                &source.source_id(),
                &text,
            )?)
        };
        let hash = match &record {
            Some(r) => Some(content_hash(r)?),
            None => None,
        };

        self.mutate(|state| {
            state.baseline = record.clone();
            state.baseline_hash = hash;
            state.working = record;
            state.initialized = true;
            state.generation += 1;
        });
        debug!("Loaded single '{}' (generation {})", self.name, self.generation());
        Ok(())
    }

    /// Replace the in-memory state and baseline from the configured
    /// source. Failure leaves the previous state untouched.
    pub async fn reload(&self) -> DataResult<()> {
        let _guard = self.init_lock.lock().await;
        self.load_now().await
    }

    /// Clone of the current working copy.
    pub fn get_working_copy(&self) -> Option<R> {
        self.read_state().working.clone()
    }

    /// Mutate the working copy in place. Requires a held record.
    pub fn modify<F>(&self, f: F) -> DataResult<()>
    where
        F: FnOnce(&mut R),
    {
        self.mutate(|state| {
            let working = state.working.as_mut().ok_or_else(|| DataError::NotFound {
                key: self.name.clone(),
            })?;
            f(working);
            Ok(())
        })
    }

    /// Re-evaluate the aggregate state after an out-of-band working
    /// copy mutation.
    pub fn mark_as_modified(&self) -> DataResult<()> {
        self.mutate(|state| {
            if state.working.is_some() {
                Ok(())
            } else {
                Err(DataError::NotFound {
                    key: self.name.clone(),
                })
            }
        })
    }

    /// Whether the working copy diverges from the baseline.
    pub fn has_unsaved_changes(&self) -> bool {
        self.read_state().is_dirty()
    }

    /// Discard working-copy edits, restoring the baseline.
    pub fn revert(&self) {
        self.mutate(|state| {
            state.working = state.baseline.clone();
        });
    }

    /// Re-baseline from the current working copy without a reload.
    pub fn reset_baseline(&self) -> DataResult<()> {
        self.mutate(|state| {
            state.baseline_hash = match &state.working {
                Some(working) => Some(content_hash(working)?),
                None => None,
            };
            state.baseline = state.working.clone();
            Ok(())
        })
    }

    pub fn stats(&self) -> RepositoryStats {
        let state = self.read_state();
        RepositoryStats {
            record_count: usize::from(state.working.is_some()),
            dirty_count: usize::from(state.is_dirty()),
            initialized: state.initialized,
        }
    }
}

impl<R: Record> super::SingleRepo<R> for EditableSingleRepository<R> {
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

    async fn get(&self) -> DataResult<Option<R>> {
        self.initialize().await?;
        Ok(self.read_state().working.clone())
    }

    fn is_initialized(&self) -> bool {
        self.read_state().initialized
    }

    fn has_record(&self) -> bool {
        self.read_state().working.is_some()
    }

    fn set(&self, record: R) -> DataResult<()> {
        self.require_initialized()?;
        self.mutate(|state| {
            state.working = Some(record);
        });
        Ok(())
    }

    fn clear(&self) -> DataResult<Option<R>> {
        self.require_initialized()?;
        Ok(self.mutate(|state| state.working.take()))
    }

    async fn save(&self) -> DataResult<()> {
        self.require_initialized()?;
        let source = self.require_source()?;
        let path = source.path.clone();
        let format = source.format;
        let source_id = source.source_id();

        let (text, hash) = {
            let state = self.read_state();
            match &state.working {
                Some(record) => (
                    codec::encode_single(format, &source_id, record)?,
                    Some(content_hash(record)?),
                ),
                None => (String::new(), None),
            }
        };

        write_data_file(&path, &text).await?;
        self.mutate(|state| {
            state.baseline = state.working.clone();
            state.baseline_hash = hash;
        });
        debug!("Saved single '{}'", self.name);
        Ok(())
    }
}

impl<R: Record + Trackable> EditableSingleRepository<R> {
    /// Apply a tracked field write to the working copy, recording or
    /// clearing per-field divergence against the baseline.
    pub fn track_property_change(&self, field: &str, value: FieldValue) -> DataResult<()> {
        let index = Self::field_index_checked(field)?;
        self.mutate(|state| {
            let working = state.working.as_mut().ok_or_else(|| DataError::NotFound {
                key: self.name.clone(),
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

    /// Whether the tracked field currently differs from its baseline
    /// value.
    pub fn is_property_modified(&self, field: &str) -> DataResult<bool> {
        let index = Self::field_index_checked(field)?;
        let state = self.read_state();
        Ok(match (&state.baseline, &state.working) {
            (Some(baseline), Some(working)) => baseline.field(index) != working.field(index),
            (None, Some(working)) => working.field(index).is_some(),
            _ => false,
        })
    }

    /// Names of tracked fields diverging from baseline, in descriptor
    /// order.
    pub fn modified_properties(&self) -> Vec<&'static str> {
        let state = self.read_state();
        R::tracked_fields()
            .iter()
            .filter(|d| match (&state.baseline, &state.working) {
                (Some(baseline), Some(working)) => {
                    baseline.field(d.index) != working.field(d.index)
                }
                (None, Some(working)) => working.field(d.index).is_some(),
                _ => false,
            })
            .map(|d| d.name)
            .collect()
    }

    /// Baseline value of one tracked field.
    pub fn property_baseline(&self, field: &str) -> DataResult<Option<FieldValue>> {
        let index = Self::field_index_checked(field)?;
        Ok(self
            .read_state()
            .baseline
            .as_ref()
            .and_then(|b| b.field(index)))
    }

    /// Restore one tracked field to its baseline value.
    pub fn revert_property(&self, field: &str) -> DataResult<()> {
        let index = Self::field_index_checked(field)?;
        self.mutate(|state| {
            let baseline_value = state.baseline.as_ref().and_then(|b| b.field(index));
            let working = state.working.as_mut().ok_or_else(|| DataError::NotFound {
                key: self.name.clone(),
            })?;
            if let Some(value) = baseline_value {
                working.apply_field(index, value);
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::Monster;
    use crate::repository::SingleRepo;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn seed(dir: &TempDir, text: &str) -> DataSource {
        let path = dir.path().join("settings.yml");
        std::fs::write(&path, text).unwrap();
        DataSource::infer(path).unwrap()
    }

    const ONE_MONSTER: &str = "id: tuner\nname: Tuner\nlevel: 1\nboss: false\ntags: []\n";

    #[tokio::test]
    async fn test_runtime_single_reads_and_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let source = seed(&dir, ONE_MONSTER);
        let repo = RuntimeSingleRepository::<Monster>::from_source("settings", source);

        let record = repo.get().await.unwrap().unwrap();
        assert_eq!(record.name, "Tuner");
        assert!(repo.has_record());

        assert_matches!(
            repo.set(Monster::new("x", "X", 1)),
            Err(DataError::UnsupportedOperation { .. })
        );
        assert_matches!(repo.clear(), Err(DataError::UnsupportedOperation { .. }));
        assert_matches!(repo.save().await, Err(DataError::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn test_empty_file_holds_no_record() {
        let dir = TempDir::new().unwrap();
        let source = seed(&dir, "");
        let repo = EditableSingleRepository::<Monster>::from_source("settings", source);

        assert_eq!(repo.get().await.unwrap(), None);
        assert!(!repo.has_record());
        assert!(!repo.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_set_save_revert_cycle() {
        let dir = TempDir::new().unwrap();
        let source = seed(&dir, ONE_MONSTER);
        let repo = EditableSingleRepository::<Monster>::from_source("settings", source.clone());
        repo.initialize().await.unwrap();

        repo.modify(|m| m.level = 5).unwrap();
        assert!(repo.has_unsaved_changes());

        repo.save().await.unwrap();
        assert!(!repo.has_unsaved_changes());

        // A fresh repository sees the edit.
        let repo2 = EditableSingleRepository::<Monster>::from_source("settings", source);
        assert_eq!(repo2.get().await.unwrap().unwrap().level, 5);

        // Revert path.
        repo.modify(|m| m.level = 9).unwrap();
        repo.revert();
        assert_eq!(repo.get_working_copy().unwrap().level, 5);
        assert!(!repo.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_clear_marks_dirty_and_save_empties_file() {
        let dir = TempDir::new().unwrap();
        let source = seed(&dir, ONE_MONSTER);
        let repo = EditableSingleRepository::<Monster>::from_source("settings", source.clone());
        repo.initialize().await.unwrap();

        let removed = repo.clear().unwrap();
        assert!(removed.is_some());
        assert!(repo.has_unsaved_changes());

        repo.save().await.unwrap();
        assert!(!repo.has_unsaved_changes());

        let repo2 = EditableSingleRepository::<Monster>::from_source("settings", source);
        assert_eq!(repo2.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_single_property_tracking() {
        let dir = TempDir::new().unwrap();
        let source = seed(&dir, ONE_MONSTER);
        let repo = EditableSingleRepository::<Monster>::from_source("settings", source);
        repo.initialize().await.unwrap();

        repo.track_property_change("level", FieldValue::Integer(4)).unwrap();
        assert!(repo.is_property_modified("level").unwrap());
        assert_eq!(repo.modified_properties(), vec!["level"]);
        assert_eq!(
            repo.property_baseline("level").unwrap(),
            Some(FieldValue::Integer(1))
        );

        repo.revert_property("level").unwrap();
        assert!(!repo.is_property_modified("level").unwrap());
        assert_eq!(repo.get_working_copy().unwrap().level, 1);
    }

    #[tokio::test]
    async fn test_dirty_notification_edges() {
        let dir = TempDir::new().unwrap();
        let source = seed(&dir, ONE_MONSTER);
        let repo = EditableSingleRepository::<Monster>::from_source("settings", source);
        repo.initialize().await.unwrap();

        let events = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let events_clone = std::sync::Arc::clone(&events);
        repo.on_dirty_changed(move |_| {
            events_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        repo.modify(|m| m.level = 2).unwrap();
        repo.modify(|m| m.level = 3).unwrap();
        assert_eq!(events.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Restoring the original value flips back to clean.
        repo.modify(|m| m.level = 1).unwrap();
        assert_eq!(events.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_in_memory_single_save_errors() {
        let repo = EditableSingleRepository::<Monster>::in_memory("scratch");
        repo.set(Monster::new("a", "Alice", 1)).unwrap();
        assert_matches!(repo.save().await, Err(DataError::NotInitialized { .. }));
    }
}
