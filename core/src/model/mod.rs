//! Record traits and the trackable-field descriptor.
//!
//! Repositories are generic over application-defined record types. A
//! type opts in by implementing [`KeyedRecord`] (table shape) and,
//! for property-level change tracking, [`Trackable`]. Generated wrapper
//! types are expected to provide these implementations; the traits are
//! deliberately small so hand-written records stay cheap too.

use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A structured value a repository can hold.
///
/// Blanket-implemented for every type with the required bounds; there
/// is nothing to implement by hand.
pub trait Record:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Record for T where
    T: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Key type for table repositories.
///
/// `Ord` keeps serialized table output deterministic (records are
/// written sorted by key), which in turn keeps content hashes stable.
pub trait RecordKey:
    Clone
    + Eq
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Whether this value is the legacy "no reference" sentinel.
    ///
    /// Only the empty string qualifies: stored data predating explicit
    /// unset references used `""` for "points at nothing". A zero
    /// integer key is a real key, never a sentinel.
    fn is_unset_sentinel(&self) -> bool {
        false
    }
}

impl RecordKey for String {
    fn is_unset_sentinel(&self) -> bool {
        self.is_empty()
    }
}
impl RecordKey for i32 {}
impl RecordKey for i64 {}
impl RecordKey for u32 {}
impl RecordKey for u64 {}

/// A record carrying its own identity field.
pub trait KeyedRecord: Record {
    type Key: RecordKey;

    /// The identity value stored inside the record.
    fn key(&self) -> Self::Key;
}

/// A single tracked field: stable index plus display name.
///
/// The index is the position in the record's descriptor table and in
/// the per-key baseline slots; names are resolved to indices once per
/// public call, never on the comparison path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub index: usize,
    pub name: &'static str,
}

/// Value of one tracked field, as seen by the change tracker.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    TextList(Vec<String>),
}

impl FieldValue {
    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::TextList(_) => "text list",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

/// Property-level change tracking support.
///
/// A record enumerates its tracked fields and exposes index-based
/// access to their values. `apply_field` returns `false` when the index
/// is unknown or the value variant does not match the field's type;
/// callers surface that as a configuration error.
pub trait Trackable {
    /// Descriptor table, one entry per tracked field, indices dense
    /// from zero.
    fn tracked_fields() -> &'static [FieldDescriptor];

    /// Current value of the field at `index`.
    fn field(&self, index: usize) -> Option<FieldValue>;

    /// Overwrite the field at `index` with `value`.
    fn apply_field(&mut self, index: usize, value: FieldValue) -> bool;

    /// Resolve a field name to its index. One linear scan; descriptor
    /// tables are small.
    fn field_index(name: &str) -> Option<usize> {
        Self::tracked_fields()
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.index)
    }
}
