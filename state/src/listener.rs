use crate::encoding::EntryKey;
use crate::entry::EntrySnapshot;

use std::fmt;

/// The kind of change a [`StateChange`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateOperation {
  /// An entry was created or overwritten.
  Set,
  /// An entry was removed explicitly or evicted after its TTL ran out.
  Remove,
  /// Every entry was dropped.
  Clear,
}

impl fmt::Display for StateOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StateOperation::Set => write!(f, "set"),
      StateOperation::Remove => write!(f, "remove"),
      StateOperation::Clear => write!(f, "clear"),
    }
  }
}

/// An informational record of one change to the table.
#[derive(Debug)]
pub struct StateChange<T> {
  pub operation: StateOperation,
  /// The affected key. `None` for [`StateOperation::Clear`].
  pub key: Option<EntryKey>,
  /// The entry after the change. Removals and clears carry an empty snapshot.
  pub entry: EntrySnapshot<T>,
}

/// A listener that can be registered with the cache to observe changes.
///
/// `on_change` is called on a dedicated background thread so it never blocks
/// cache operations. Notifications are best-effort: if the listener falls far
/// behind, excess notifications are dropped. Nothing about cache correctness
/// depends on them.
pub trait ChangeListener<T>: Send + Sync {
  fn on_change(&self, change: StateChange<T>);
}
