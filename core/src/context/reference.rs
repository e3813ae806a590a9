//! Lazy, typed cross-repository references.
//!
//! A [`DataRef`] stores a key and the static type of the record it
//! points at; nothing is looked up until the reference is evaluated
//! against a live [`DataContext`](super::DataContext). An unset
//! reference is explicit (`None`), so a zero integer key is a real
//! reference to key `0`, not "no reference"; for string keys the empty
//! string still deserializes as unset to tolerate stored legacy data.

use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DataResult;
use crate::model::{KeyedRecord, RecordKey};

use super::DataContext;

/// A stored key plus the static target record type, resolved lazily.
pub struct DataRef<R: KeyedRecord> {
    key: Option<R::Key>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: KeyedRecord> DataRef<R> {
    /// A reference to `key`. A sentinel key (empty string) collapses
    /// to the unset reference.
    pub fn to(key: R::Key) -> Self {
        if key.is_unset_sentinel() {
            Self::none()
        } else {
            Self {
                key: Some(key),
                _marker: PhantomData,
            }
        }
    }

    /// The unset reference.
    pub fn none() -> Self {
        Self {
            key: None,
            _marker: PhantomData,
        }
    }

    /// The stored key, when set.
    pub fn key(&self) -> Option<&R::Key> {
        self.key.as_ref()
    }

    /// Whether this reference points at anything.
    pub fn has_value(&self) -> bool {
        self.key.is_some()
    }

    /// Evaluate against `context`. Unset references and missing
    /// target records are `Ok(None)`; a target repository that is not
    /// registered in the context is a configuration error. The
    /// referenced repository is never mutated.
    pub async fn resolve(&self, context: &DataContext) -> DataResult<Option<R>> {
        context.resolve(self).await
    }
}

impl<R: KeyedRecord> Default for DataRef<R> {
    fn default() -> Self {
        Self::none()
    }
}

impl<R: KeyedRecord> Clone for DataRef<R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R: KeyedRecord> PartialEq for DataRef<R> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<R: KeyedRecord> Eq for DataRef<R> {}

impl<R: KeyedRecord> std::fmt::Debug for DataRef<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "DataRef({key})"),
            None => write!(f, "DataRef(unset)"),
        }
    }
}

// References serialize as their raw key (or null), never as a nested
// object.
impl<R: KeyedRecord> Serialize for DataRef<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.key.serialize(serializer)
    }
}

impl<'de, R: KeyedRecord> Deserialize<'de> for DataRef<R> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = Option::<R::Key>::deserialize(deserializer)?;
        Ok(match key {
            Some(key) => Self::to(key),
            None => Self::none(),
        })
    }
}
