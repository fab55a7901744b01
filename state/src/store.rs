use crate::encoding::EntryKey;
use crate::entry::{CacheEntry, EntrySnapshot};
use crate::error::{Result, StateError};

use std::fmt;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// The outcome of a write, for metrics and change notification.
#[derive(Debug)]
pub(crate) struct WriteOutcome<T> {
  pub(crate) value: Arc<T>,
  pub(crate) snapshot: EntrySnapshot<T>,
  /// `true` if the write created the entry.
  pub(crate) created: bool,
}

/// The mapping from encoded key to live cache entry.
///
/// Every method is synchronous; callers hold the table lock for the whole
/// call, so no reader can observe a half-applied write or clear.
pub(crate) struct EntryStore<T> {
  entries: HashMap<EntryKey, CacheEntry<T>>,
  next_seq: u64,
}

impl<T> fmt::Debug for EntryStore<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntryStore")
      .field("len", &self.entries.len())
      .finish_non_exhaustive()
  }
}

impl<T> EntryStore<T>
where
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
  pub(crate) fn new() -> Self {
    Self {
      entries: HashMap::new(),
      next_seq: 0,
    }
  }

  /// Writes `value` under `key`, creating the entry if absent.
  ///
  /// With `merge` set and a prior value present, the new value's top-level
  /// fields overlay the prior ones and prior fields absent from the new value
  /// persist. Otherwise the new value replaces the old one.
  pub(crate) fn write(&mut self, key: EntryKey, value: T, merge: bool) -> Result<WriteOutcome<T>> {
    match self.entries.get_mut(&key) {
      Some(entry) => {
        let value = if merge {
          Arc::new(shallow_merge(entry.data(), value)?)
        } else {
          Arc::new(value)
        };
        entry.replace(value.clone());
        Ok(WriteOutcome {
          value,
          snapshot: entry.snapshot(),
          created: false,
        })
      }
      None => {
        let value = Arc::new(value);
        let entry = CacheEntry::new(value.clone(), self.next_seq);
        self.next_seq += 1;
        let snapshot = entry.snapshot();
        self.entries.insert(key, entry);
        Ok(WriteOutcome {
          value,
          snapshot,
          created: true,
        })
      }
    }
  }

  #[inline]
  pub(crate) fn read(&self, key: &EntryKey) -> Option<&CacheEntry<T>> {
    self.entries.get(key)
  }

  #[inline]
  pub(crate) fn contains(&self, key: &EntryKey) -> bool {
    self.entries.contains_key(key)
  }

  /// Removes the entry for `key`. Removing an absent key is a no-op.
  #[inline]
  pub(crate) fn remove(&mut self, key: &EntryKey) -> Option<CacheEntry<T>> {
    self.entries.remove(key)
  }

  /// Removes every entry, returning how many were resident.
  pub(crate) fn clear(&mut self) -> usize {
    let count = self.entries.len();
    self.entries.clear();
    count
  }

  /// Number of resident entries, including expired ones that have not been
  /// addressed since they expired.
  #[inline]
  pub(crate) fn count(&self) -> usize {
    self.entries.len()
  }

  /// Iterates over the resident entries in insertion order.
  pub(crate) fn iter_ordered(&self) -> impl Iterator<Item = (&EntryKey, &CacheEntry<T>)> {
    let mut entries: Vec<_> = self.entries.iter().collect();
    entries.sort_unstable_by_key(|(_, entry)| entry.seq());
    entries.into_iter()
  }
}

/// Overlays the top-level fields of `update` onto `prior`.
///
/// Values that do not serialize to JSON objects cannot be merged field by
/// field, so `update` replaces `prior` wholesale for them.
pub(crate) fn shallow_merge<T>(prior: &T, update: T) -> Result<T>
where
  T: Serialize + DeserializeOwned,
{
  let invalid = |e: serde_json::Error| StateError::InvalidSource(e.to_string());

  let base = serde_json::to_value(prior).map_err(invalid)?;
  let overlay = serde_json::to_value(&update).map_err(invalid)?;

  match (base, overlay) {
    (Value::Object(mut base), Value::Object(overlay)) => {
      for (field, value) in overlay {
        base.insert(field, value);
      }
      serde_json::from_value(Value::Object(base)).map_err(invalid)
    }
    _ => Ok(update),
  }
}
