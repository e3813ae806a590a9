//! Tabula Core Library
//!
//! A format-agnostic data repository and change-tracking engine for
//! structured records stored as files. It provides a consistent
//! surface for loading, editing, and persisting configuration data
//! across three concerns at once:
//!
//! - **Codecs**: YAML, JSON, and TOML behind one load/save contract
//!   for single records and keyed tables.
//! - **Repositories**: keyed-table, single-record, and asset shapes,
//!   each in a read-only runtime variant and a read/write editable
//!   variant sharing one interface, with baseline/working-copy change
//!   tracking and clean revert.
//! - **Identity**: stable GUID identities for file-backed assets,
//!   persisted in sidecar metadata files and independent of file path.
//!
//! A [`context::DataContext`] composes repositories into one unit with
//! bulk load/save and lazy cross-repository references; the
//! [`lock::LockService`] coordinates concurrent editor sessions with
//! lease-based advisory locks.
//!
//! # Usage
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use tabula_core::context::DataContext;
//! use tabula_core::model::KeyedRecord;
//! use tabula_core::repository::TableRepo;
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Item {
//!     id: String,
//!     price: i64,
//! }
//!
//! impl KeyedRecord for Item {
//!     type Key = String;
//!     fn key(&self) -> String {
//!         self.id.clone()
//!     }
//! }
//!
//! # async fn run() -> tabula_core::DataResult<()> {
//! let ctx = DataContext::builder("data")
//!     .editable_table::<Item>("items", "items.yml")
//!     .build()?;
//!
//! let report = ctx.load_all().await;
//! assert!(report.is_success());
//!
//! let items = ctx.editable_table::<Item>("items").unwrap();
//! items.insert(Item { id: "potion".into(), price: 25 })?;
//! items.save().await?;
//! # Ok(())
//! # }
//! ```

pub mod asset;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod logging;
pub mod model;
pub mod repository;
pub mod tracking;

// Re-export the types most call sites touch.
pub use asset::{AssetId, AssetMetadata, AssetSummary};
pub use codec::DataFormat;
pub use config::ContextConfig;
pub use context::{
    BulkReport, DataContext, DataContextBuilder, DataRef, DataTypeInfo, ManagedRepository,
    SlotKind,
};
pub use error::{DataError, DataResult};
pub use lock::{LockEvent, LockEventKind, LockInfo, LockService};
pub use model::{FieldDescriptor, FieldValue, KeyedRecord, Record, RecordKey, Trackable};
pub use repository::{
    AssetRepository, DataSource, EditableSingleRepository, EditableTableRepository, EntryStatus,
    RepositoryStats, RuntimeSingleRepository, RuntimeTableRepository, SingleRepo, TableRepo,
};
pub use tracking::{content_hash, ContentHash};

/// Current library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
