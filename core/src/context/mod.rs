//! Data-context orchestrator.
//!
//! A context composes many repositories into one unit behind an
//! explicit, statically-built registry: the builder maps logical
//! data-set names to repository factories plus source configuration,
//! resolving each slot's path and format exactly once at registration.
//! Bulk load/save fans out one task per repository and isolates
//! per-unit failures; the context also hosts the reference resolver,
//! finding a sibling repository by the reference's static record type.

pub mod reference;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::codec::DataFormat;
use crate::error::{DataError, DataResult};
use crate::model::{KeyedRecord, Record};
use crate::repository::{
    AssetRepository, DataSource, EditableSingleRepository, EditableTableRepository,
    RuntimeSingleRepository, RuntimeTableRepository, SingleRepo, TableRepo,
};

pub use reference::DataRef;

/// Boxed future used by the type-erased repository surface.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The closed set of repository shapes a context can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Table,
    Single,
    Asset,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SlotKind::Table => "table",
            SlotKind::Single => "single",
            SlotKind::Asset => "asset",
        };
        write!(f, "{name}")
    }
}

/// Type-erased view of one hosted repository, used for bulk
/// operations and introspection.
pub trait ManagedRepository: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> SlotKind;
    fn is_editable(&self) -> bool;
    fn is_initialized(&self) -> bool;
    fn has_unsaved_changes(&self) -> bool;
    /// Absolute path (folder for asset repositories) backing the
    /// repository, when one is configured.
    fn resolved_path(&self) -> Option<PathBuf>;
    /// Initial load; idempotent and coalescing.
    fn load(&self) -> BoxFuture<'_, DataResult<()>>;
    /// Full state-and-baseline replacement from the source.
    fn reload(&self) -> BoxFuture<'_, DataResult<()>>;
    /// Persist to the source. Unsupported on read-only repositories.
    fn save(&self) -> BoxFuture<'_, DataResult<()>>;
}

struct RuntimeTableSlot<R: KeyedRecord>(Arc<RuntimeTableRepository<R>>);
struct EditableTableSlot<R: KeyedRecord>(Arc<EditableTableRepository<R>>);
struct RuntimeSingleSlot<R: Record>(Arc<RuntimeSingleRepository<R>>);
struct EditableSingleSlot<R: Record>(Arc<EditableSingleRepository<R>>);
struct AssetSlot<R: Record>(Arc<AssetRepository<R>>);

impl<R: KeyedRecord> ManagedRepository for RuntimeTableSlot<R> {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn kind(&self) -> SlotKind {
        SlotKind::Table
    }
    fn is_editable(&self) -> bool {
        false
    }
    fn is_initialized(&self) -> bool {
        TableRepo::is_initialized(self.0.as_ref())
    }
    fn has_unsaved_changes(&self) -> bool {
        false
    }
    fn resolved_path(&self) -> Option<PathBuf> {
        self.0.source().map(|s| s.path.clone())
    }
    fn load(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(TableRepo::initialize(self.0.as_ref()))
    }
    fn reload(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(self.0.reload())
    }
    fn save(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(async { Err(DataError::UnsupportedOperation { operation: "save" }) })
    }
}

impl<R: KeyedRecord> ManagedRepository for EditableTableSlot<R> {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn kind(&self) -> SlotKind {
        SlotKind::Table
    }
    fn is_editable(&self) -> bool {
        true
    }
    fn is_initialized(&self) -> bool {
        TableRepo::is_initialized(self.0.as_ref())
    }
    fn has_unsaved_changes(&self) -> bool {
        self.0.has_any_unsaved_changes()
    }
    fn resolved_path(&self) -> Option<PathBuf> {
        self.0.source().map(|s| s.path.clone())
    }
    fn load(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(TableRepo::initialize(self.0.as_ref()))
    }
    fn reload(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(self.0.reload())
    }
    fn save(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(TableRepo::save(self.0.as_ref()))
    }
}

impl<R: Record> ManagedRepository for RuntimeSingleSlot<R> {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn kind(&self) -> SlotKind {
        SlotKind::Single
    }
    fn is_editable(&self) -> bool {
        false
    }
    fn is_initialized(&self) -> bool {
        SingleRepo::is_initialized(self.0.as_ref())
    }
    fn has_unsaved_changes(&self) -> bool {
        false
    }
    fn resolved_path(&self) -> Option<PathBuf> {
        self.0.source().map(|s| s.path.clone())
    }
    fn load(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(SingleRepo::initialize(self.0.as_ref()))
    }
    fn reload(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(self.0.reload())
    }
    fn save(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(async { Err(DataError::UnsupportedOperation { operation: "save" }) })
    }
}

impl<R: Record> ManagedRepository for EditableSingleSlot<R> {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn kind(&self) -> SlotKind {
        SlotKind::Single
    }
    fn is_editable(&self) -> bool {
        true
    }
    fn is_initialized(&self) -> bool {
        SingleRepo::is_initialized(self.0.as_ref())
    }
    fn has_unsaved_changes(&self) -> bool {
        self.0.has_unsaved_changes()
    }
    fn resolved_path(&self) -> Option<PathBuf> {
        self.0.source().map(|s| s.path.clone())
    }
    fn load(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(SingleRepo::initialize(self.0.as_ref()))
    }
    fn reload(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(self.0.reload())
    }
    fn save(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(SingleRepo::save(self.0.as_ref()))
    }
}

impl<R: Record> ManagedRepository for AssetSlot<R> {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn kind(&self) -> SlotKind {
        SlotKind::Asset
    }
    fn is_editable(&self) -> bool {
        true
    }
    fn is_initialized(&self) -> bool {
        self.0.is_initialized()
    }
    fn has_unsaved_changes(&self) -> bool {
        // Asset mutations persist immediately; only payload edits held
        // in cache can diverge, and those are per-asset.
        false
    }
    fn resolved_path(&self) -> Option<PathBuf> {
        Some(self.0.root().to_path_buf())
    }
    fn load(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(self.0.initialize())
    }
    fn reload(&self) -> BoxFuture<'_, DataResult<()>> {
        Box::pin(self.0.reload())
    }
    fn save(&self) -> BoxFuture<'_, DataResult<()>> {
        // File-per-record repositories have no deferred whole-set
        // save; the scan state is already authoritative.
        Box::pin(async { Ok(()) })
    }
}

/// Typed handle to a table slot, either variant.
pub enum TableHandle<R: KeyedRecord> {
    Runtime(Arc<RuntimeTableRepository<R>>),
    Editable(Arc<EditableTableRepository<R>>),
}

impl<R: KeyedRecord> Clone for TableHandle<R> {
    fn clone(&self) -> Self {
        match self {
            TableHandle::Runtime(repo) => TableHandle::Runtime(Arc::clone(repo)),
            TableHandle::Editable(repo) => TableHandle::Editable(Arc::clone(repo)),
        }
    }
}

impl<R: KeyedRecord> TableHandle<R> {
    pub async fn get(&self, key: &R::Key) -> DataResult<R> {
        match self {
            TableHandle::Runtime(repo) => repo.get(key).await,
            TableHandle::Editable(repo) => repo.get(key).await,
        }
    }

    pub async fn try_get(&self, key: &R::Key) -> DataResult<Option<R>> {
        match self {
            TableHandle::Runtime(repo) => repo.try_get(key).await,
            TableHandle::Editable(repo) => repo.try_get(key).await,
        }
    }

    pub async fn get_all(&self) -> DataResult<Vec<R>> {
        match self {
            TableHandle::Runtime(repo) => repo.get_all().await,
            TableHandle::Editable(repo) => repo.get_all().await,
        }
    }

    pub fn as_editable(&self) -> Option<&Arc<EditableTableRepository<R>>> {
        match self {
            TableHandle::Runtime(_) => None,
            TableHandle::Editable(repo) => Some(repo),
        }
    }
}

/// Typed handle to a single slot, either variant.
pub enum SingleHandle<R: Record> {
    Runtime(Arc<RuntimeSingleRepository<R>>),
    Editable(Arc<EditableSingleRepository<R>>),
}

impl<R: Record> Clone for SingleHandle<R> {
    fn clone(&self) -> Self {
        match self {
            SingleHandle::Runtime(repo) => SingleHandle::Runtime(Arc::clone(repo)),
            SingleHandle::Editable(repo) => SingleHandle::Editable(Arc::clone(repo)),
        }
    }
}

impl<R: Record> SingleHandle<R> {
    pub async fn get(&self) -> DataResult<Option<R>> {
        match self {
            SingleHandle::Runtime(repo) => repo.get().await,
            SingleHandle::Editable(repo) => repo.get().await,
        }
    }

    pub fn as_editable(&self) -> Option<&Arc<EditableSingleRepository<R>>> {
        match self {
            SingleHandle::Runtime(_) => None,
            SingleHandle::Editable(repo) => Some(repo),
        }
    }
}

struct Slot {
    repo: Arc<dyn ManagedRepository>,
    configured_path: Option<PathBuf>,
    typed: Box<dyn Any + Send + Sync>,
}

/// Outcome of one repository's part in a bulk operation.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub name: String,
    /// Rendered failure, `None` on success.
    pub error: Option<String>,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-unit results of a bulk load or save. The aggregate succeeds
/// only when every unit did; failed units never stop the others.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(UnitOutcome::is_success)
    }

    pub fn failures(&self) -> Vec<&UnitOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }
}

/// Introspection record for one hosted data set.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTypeInfo {
    pub name: String,
    pub kind: SlotKind,
    pub editable: bool,
    /// Path as registered, relative to the context root.
    pub configured_path: Option<PathBuf>,
    /// Resolved absolute path.
    pub resolved_path: Option<PathBuf>,
    pub initialized: bool,
    pub dirty: bool,
}

/// Explicit registry builder mapping logical names to repositories.
pub struct DataContextBuilder {
    root: PathBuf,
    default_format: Option<DataFormat>,
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    type_index: HashMap<TypeId, String>,
    error: Option<DataError>,
}

impl DataContextBuilder {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            default_format: None,
            order: Vec::new(),
            slots: HashMap::new(),
            type_index: HashMap::new(),
            error: None,
        }
    }

    /// Format used when a registered path's extension is not
    /// recognized.
    pub fn default_format(mut self, format: DataFormat) -> Self {
        self.default_format = Some(format);
        self
    }

    /// Register an editable table repository for `R` at `path`
    /// (relative to the root), format inferred from the extension.
    pub fn editable_table<R: KeyedRecord>(self, name: &str, path: &str) -> Self {
        self.table_slot::<R>(name, path, None, true)
    }

    /// Register an editable table repository with an explicit format.
    pub fn editable_table_with<R: KeyedRecord>(
        self,
        name: &str,
        path: &str,
        format: DataFormat,
    ) -> Self {
        self.table_slot::<R>(name, path, Some(format), true)
    }

    /// Register a read-only table repository.
    pub fn runtime_table<R: KeyedRecord>(self, name: &str, path: &str) -> Self {
        self.table_slot::<R>(name, path, None, false)
    }

    /// Register a read-only table repository with an explicit format.
    pub fn runtime_table_with<R: KeyedRecord>(
        self,
        name: &str,
        path: &str,
        format: DataFormat,
    ) -> Self {
        self.table_slot::<R>(name, path, Some(format), false)
    }

    /// Register an editable single-record repository.
    pub fn editable_single<R: Record>(self, name: &str, path: &str) -> Self {
        self.single_slot::<R>(name, path, None, true)
    }

    /// Register a read-only single-record repository.
    pub fn runtime_single<R: Record>(self, name: &str, path: &str) -> Self {
        self.single_slot::<R>(name, path, None, false)
    }

    /// Register an asset repository over `folder` (relative to the
    /// root), matching data files by `extension`.
    pub fn assets<R: Record>(mut self, name: &str, folder: &str, extension: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        let root = self.root.join(folder);
        match AssetRepository::<R>::new(name, root, extension) {
            Ok(repo) => {
                let repo = Arc::new(repo);
                self.push_slot(
                    name,
                    Slot {
                        repo: Arc::new(AssetSlot(Arc::clone(&repo))),
                        configured_path: Some(PathBuf::from(folder)),
                        typed: Box::new(repo),
                    },
                );
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    fn table_slot<R: KeyedRecord>(
        mut self,
        name: &str,
        path: &str,
        format: Option<DataFormat>,
        editable: bool,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let source = match self.resolve_source(path, format) {
            Ok(source) => source,
            Err(e) => {
                self.error = Some(e);
                return self;
            }
        };
        if let Err(e) = self.index_record_type::<R>(name) {
            self.error = Some(e);
            return self;
        }
        let typed: Box<dyn Any + Send + Sync>;
        let repo: Arc<dyn ManagedRepository>;
        if editable {
            let table = Arc::new(EditableTableRepository::<R>::from_source(name, source));
            repo = Arc::new(EditableTableSlot(Arc::clone(&table)));
            typed = Box::new(TableHandle::Editable(table));
        } else {
            let table = Arc::new(RuntimeTableRepository::<R>::from_source(name, source));
            repo = Arc::new(RuntimeTableSlot(Arc::clone(&table)));
            typed = Box::new(TableHandle::Runtime(table));
        }
        self.push_slot(
            name,
            Slot {
                repo,
                configured_path: Some(PathBuf::from(path)),
                typed,
            },
        );
        self
    }

    fn single_slot<R: Record>(
        mut self,
        name: &str,
        path: &str,
        format: Option<DataFormat>,
        editable: bool,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let source = match self.resolve_source(path, format) {
            Ok(source) => source,
            Err(e) => {
                self.error = Some(e);
                return self;
            }
        };
        let typed: Box<dyn Any + Send + Sync>;
        let repo: Arc<dyn ManagedRepository>;
        if editable {
            let single = Arc::new(EditableSingleRepository::<R>::from_source(name, source));
            repo = Arc::new(EditableSingleSlot(Arc::clone(&single)));
            typed = Box::new(SingleHandle::Editable(single));
        } else {
            let single = Arc::new(RuntimeSingleRepository::<R>::from_source(name, source));
            repo = Arc::new(RuntimeSingleSlot(Arc::clone(&single)));
            typed = Box::new(SingleHandle::Runtime(single));
        }
        self.push_slot(
            name,
            Slot {
                repo,
                configured_path: Some(PathBuf::from(path)),
                typed,
            },
        );
        self
    }

    fn resolve_source(&self, path: &str, format: Option<DataFormat>) -> DataResult<DataSource> {
        let absolute = self.root.join(path);
        let format = match format.or(self.default_format) {
            Some(format) => format,
            None => DataFormat::from_extension(&absolute)?,
        };
        Ok(DataSource::new(absolute, format))
    }

    fn index_record_type<R: KeyedRecord>(&mut self, name: &str) -> DataResult<()> {
        if let Some(existing) = self
            .type_index
            .insert(TypeId::of::<R>(), name.to_string())
        {
            return Err(DataError::config(format!(
                "Record type of table '{name}' is already registered under '{existing}'; \
                 references resolve by record type and must be unambiguous"
            )));
        }
        Ok(())
    }

    fn push_slot(&mut self, name: &str, slot: Slot) {
        if self.slots.contains_key(name) {
            self.error = Some(DataError::config(format!(
                "Duplicate data set name '{name}'"
            )));
            return;
        }
        self.order.push(name.to_string());
        self.slots.insert(name.to_string(), slot);
    }

    /// Finish the registry. The first registration problem, if any,
    /// surfaces here.
    pub fn build(self) -> DataResult<DataContext> {
        if let Some(error) = self.error {
            return Err(error);
        }
        debug!("Data context built with {} data sets", self.order.len());
        Ok(DataContext {
            root: self.root,
            order: self.order,
            slots: self.slots,
            type_index: self.type_index,
        })
    }
}

/// A composed set of repositories addressed by logical name.
pub struct DataContext {
    root: PathBuf,
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    type_index: HashMap<TypeId, String>,
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("root", &self.root)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl DataContext {
    pub fn builder<P: Into<PathBuf>>(root: P) -> DataContextBuilder {
        DataContextBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registered data-set names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Type-erased repository under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ManagedRepository>> {
        self.slots.get(name).map(|s| Arc::clone(&s.repo))
    }

    /// Typed table handle under `name`. `None` when the name is
    /// unknown or the slot holds a different shape or record type.
    pub fn table<R: KeyedRecord>(&self, name: &str) -> Option<TableHandle<R>> {
        self.slots
            .get(name)
            .and_then(|s| s.typed.downcast_ref::<TableHandle<R>>())
            .cloned()
    }

    /// Typed editable table under `name`.
    pub fn editable_table<R: KeyedRecord>(
        &self,
        name: &str,
    ) -> Option<Arc<EditableTableRepository<R>>> {
        self.table::<R>(name)
            .and_then(|h| h.as_editable().cloned())
    }

    /// Typed single handle under `name`.
    pub fn single<R: Record>(&self, name: &str) -> Option<SingleHandle<R>> {
        self.slots
            .get(name)
            .and_then(|s| s.typed.downcast_ref::<SingleHandle<R>>())
            .cloned()
    }

    /// Typed editable single under `name`.
    pub fn editable_single<R: Record>(
        &self,
        name: &str,
    ) -> Option<Arc<EditableSingleRepository<R>>> {
        self.single::<R>(name)
            .and_then(|h| h.as_editable().cloned())
    }

    /// Typed asset repository under `name`.
    pub fn assets<R: Record>(&self, name: &str) -> Option<Arc<AssetRepository<R>>> {
        self.slots
            .get(name)
            .and_then(|s| s.typed.downcast_ref::<Arc<AssetRepository<R>>>())
            .cloned()
    }

    /// Load every repository concurrently, one task per slot. A
    /// failing unit is isolated; the report carries every outcome.
    pub async fn load_all(&self) -> BulkReport {
        self.fan_out(false).await
    }

    /// Save every editable repository concurrently. Read-only slots
    /// are skipped.
    pub async fn save_all(&self) -> BulkReport {
        self.fan_out(true).await
    }

    async fn fan_out(&self, saving: bool) -> BulkReport {
        let mut join = JoinSet::new();
        for name in &self.order {
            let slot = &self.slots[name];
            if saving && !slot.repo.is_editable() {
                debug!("Skipping read-only data set '{name}' in bulk save");
                continue;
            }
            let repo = Arc::clone(&slot.repo);
            let name = name.clone();
            join.spawn(async move {
                let result = if saving { repo.save().await } else { repo.load().await };
                (name, result)
            });
        }

        let mut by_name: HashMap<String, Option<String>> = HashMap::new();
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    by_name.insert(name, None);
                }
                Ok((name, Err(e))) => {
                    warn!("Bulk {} of '{name}' failed: {e}", if saving { "save" } else { "load" });
                    by_name.insert(name, Some(e.to_string()));
                }
                Err(join_error) => {
                    warn!("Bulk task failed to complete: {join_error}");
                }
            }
        }

        let outcomes = self
            .order
            .iter()
            .filter_map(|name| {
                by_name.remove(name).map(|error| UnitOutcome {
                    name: name.clone(),
                    error,
                })
            })
            .collect();
        BulkReport { outcomes }
    }

    /// Re-run the load for exactly one repository, replacing its
    /// in-memory state and baseline.
    pub async fn reload(&self, name: &str) -> DataResult<()> {
        let slot = self.slots.get(name).ok_or_else(|| {
            DataError::config(format!("No data set registered under '{name}'"))
        })?;
        slot.repo.reload().await
    }

    /// Evaluate a reference against this context. Unset references
    /// and missing records are `Ok(None)`; an unregistered target
    /// repository is a configuration error.
    pub async fn resolve<R: KeyedRecord>(&self, reference: &DataRef<R>) -> DataResult<Option<R>> {
        let Some(key) = reference.key() else {
            return Ok(None);
        };
        let name = self.type_index.get(&TypeId::of::<R>()).ok_or_else(|| {
            DataError::config(format!(
                "No table repository registered for record type {}",
                std::any::type_name::<R>()
            ))
        })?;
        let handle = self.table::<R>(name).ok_or_else(|| {
            DataError::config(format!(
                "Data set '{name}' does not hold records of type {}",
                std::any::type_name::<R>()
            ))
        })?;
        handle.try_get(key).await
    }

    /// Name, shape, paths, and state of every hosted data set, in
    /// registration order.
    pub fn data_type_infos(&self) -> Vec<DataTypeInfo> {
        self.order
            .iter()
            .map(|name| {
                let slot = &self.slots[name];
                DataTypeInfo {
                    name: name.clone(),
                    kind: slot.repo.kind(),
                    editable: slot.repo.is_editable(),
                    configured_path: slot.configured_path.clone(),
                    resolved_path: slot.repo.resolved_path(),
                    initialized: slot.repo.is_initialized(),
                    dirty: slot.repo.has_unsaved_changes(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::Monster;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn seed(dir: &TempDir, name: &str, text: &str) {
        std::fs::write(dir.path().join(name), text).unwrap();
    }

    const MONSTERS: &str = "- id: a\n  name: Alice\n  level: 1\n  boss: false\n  tags: []\n";

    #[tokio::test]
    async fn test_builder_rejects_duplicate_names() {
        let dir = TempDir::new().unwrap();
        seed(&dir, "monsters.yml", MONSTERS);

        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Other {
            id: String,
        }
        impl KeyedRecord for Other {
            type Key = String;
            fn key(&self) -> String {
                self.id.clone()
            }
        }

        let err = DataContext::builder(dir.path())
            .editable_table::<Monster>("monsters", "monsters.yml")
            .editable_table::<Other>("monsters", "monsters.yml")
            .build()
            .unwrap_err();
        assert_matches!(err, DataError::Configuration { .. });
    }

    #[tokio::test]
    async fn test_builder_rejects_unknown_extension_without_default() {
        let dir = TempDir::new().unwrap();
        let err = DataContext::builder(dir.path())
            .editable_table::<Monster>("monsters", "monsters.dat")
            .build()
            .unwrap_err();
        assert_matches!(err, DataError::Configuration { .. });

        // An explicit default format resolves it.
        let ctx = DataContext::builder(dir.path())
            .default_format(DataFormat::Yaml)
            .editable_table::<Monster>("monsters", "monsters.dat")
            .build()
            .unwrap();
        assert!(ctx.table::<Monster>("monsters").is_some());
    }

    #[tokio::test]
    async fn test_typed_accessors() {
        let dir = TempDir::new().unwrap();
        seed(&dir, "monsters.yml", MONSTERS);

        let ctx = DataContext::builder(dir.path())
            .editable_table::<Monster>("monsters", "monsters.yml")
            .build()
            .unwrap();

        assert!(ctx.table::<Monster>("monsters").is_some());
        assert!(ctx.editable_table::<Monster>("monsters").is_some());
        assert!(ctx.table::<Monster>("missing").is_none());
        assert!(ctx.get("monsters").is_some());

        let repo = ctx.editable_table::<Monster>("monsters").unwrap();
        let record = repo.get(&"a".to_string()).await.unwrap();
        assert_eq!(record.name, "Alice");
    }

    #[tokio::test]
    async fn test_reference_resolution() {
        let dir = TempDir::new().unwrap();
        seed(&dir, "monsters.yml", MONSTERS);

        let ctx = DataContext::builder(dir.path())
            .editable_table::<Monster>("monsters", "monsters.yml")
            .build()
            .unwrap();

        let reference: DataRef<Monster> = DataRef::to("a".to_string());
        let resolved = reference.resolve(&ctx).await.unwrap().unwrap();
        assert_eq!(resolved.name, "Alice");

        // Missing key is absence, not an error.
        let missing: DataRef<Monster> = DataRef::to("zzz".to_string());
        assert_eq!(missing.resolve(&ctx).await.unwrap(), None);

        // Unset reference is absence.
        let unset: DataRef<Monster> = DataRef::none();
        assert_eq!(unset.resolve(&ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reference_to_unregistered_type_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let ctx = DataContext::builder(dir.path()).build().unwrap();

        let reference: DataRef<Monster> = DataRef::to("a".to_string());
        let err = reference.resolve(&ctx).await.unwrap_err();
        assert_matches!(err, DataError::Configuration { .. });
    }

    #[tokio::test]
    async fn test_data_type_infos() {
        let dir = TempDir::new().unwrap();
        seed(&dir, "monsters.yml", MONSTERS);

        let ctx = DataContext::builder(dir.path())
            .editable_table::<Monster>("monsters", "monsters.yml")
            .build()
            .unwrap();

        let infos = ctx.data_type_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "monsters");
        assert_eq!(infos[0].kind, SlotKind::Table);
        assert!(infos[0].editable);
        assert!(!infos[0].initialized);
        assert_eq!(infos[0].configured_path, Some(PathBuf::from("monsters.yml")));
        assert_eq!(
            infos[0].resolved_path,
            Some(dir.path().join("monsters.yml"))
        );

        ctx.load_all().await;
        let infos = ctx.data_type_infos();
        assert!(infos[0].initialized);
        assert!(!infos[0].dirty);
    }
}
