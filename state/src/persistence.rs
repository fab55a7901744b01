//! The boundary to an external persistence layer.
//!
//! The cache is the source of truth for reads. Persistence is consulted on
//! read-through misses and bulk reloads, and receives a fire-and-forget copy
//! of every local write, removal and clear.

use crate::error::StateError;
use crate::runtime::TaskSpawner;
use crate::source::{self, Source, StateStream};

use std::fmt;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};

/// The contract an external persistence collaborator implements.
///
/// Each method returns a [`Source`], so an implementation may answer with a
/// ready value, a future, or a stream. Sources of `Vec<T>` may emit several
/// batches; the cache concatenates them until the source completes.
pub trait Persistence<T, Id>: Send + Sync + 'static {
  /// Every persisted item.
  fn all(&self) -> Source<Vec<T>>;

  /// The items matching `ids`. The result may be shorter than the input.
  fn get(&self, ids: Vec<Id>) -> Source<Vec<T>>;

  /// Stores `items`, which the cache has just written locally.
  fn set(&self, items: Vec<Arc<T>>) -> Source<()>;

  /// Deletes the items with the given identities.
  fn remove(&self, ids: Vec<Id>) -> Source<()>;

  /// Deletes everything. `None` means the backend does not support it.
  fn clear(&self) -> Option<Source<()>> {
    None
  }
}

/// Routes cache misses and write relays to an optional [`Persistence`].
pub(crate) struct PersistenceBridge<T, Id> {
  persistence: Option<Arc<dyn Persistence<T, Id>>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

impl<T, Id> fmt::Debug for PersistenceBridge<T, Id> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PersistenceBridge")
      .field("registered", &self.persistence.is_some())
      .finish_non_exhaustive()
  }
}

impl<T, Id> PersistenceBridge<T, Id>
where
  T: Send + Sync + 'static,
  Id: Send + 'static,
{
  pub(crate) fn new(
    persistence: Option<Arc<dyn Persistence<T, Id>>>,
    spawner: Option<Arc<dyn TaskSpawner>>,
  ) -> Self {
    Self {
      persistence,
      spawner,
    }
  }

  #[inline]
  pub(crate) fn is_registered(&self) -> bool {
    self.persistence.is_some()
  }

  /// Reads every item. Emits once with all batches concatenated.
  pub(crate) fn fetch_all(&self) -> StateStream<Vec<T>> {
    let persistence = self.persistence.clone();
    stream::once(async move {
      let persistence = persistence.ok_or(StateError::PersistenceUnavailable)?;
      source::drain_batches(persistence.all()).await
    })
    .boxed()
  }

  /// Reads the items for `ids`. Emits once, or fails with
  /// [`StateError::ItemNotFound`] if nothing came back.
  pub(crate) fn fetch_by_ids(&self, ids: Vec<Id>, requested: String) -> StateStream<Vec<T>> {
    let persistence = self.persistence.clone();
    stream::once(async move {
      let persistence = persistence.ok_or(StateError::PersistenceUnavailable)?;
      let items = source::drain_batches(persistence.get(ids)).await?;
      if items.is_empty() {
        return Err(StateError::ItemNotFound(requested));
      }
      Ok(items)
    })
    .boxed()
  }

  pub(crate) fn persist_write(&self, items: Vec<Arc<T>>) {
    if let Some(persistence) = &self.persistence {
      self.relay("set", persistence.set(items));
    }
  }

  pub(crate) fn persist_remove(&self, ids: Vec<Id>) {
    if let Some(persistence) = &self.persistence {
      self.relay("remove", persistence.remove(ids));
    }
  }

  pub(crate) fn persist_clear(&self) {
    let Some(persistence) = &self.persistence else {
      return;
    };
    match persistence.clear() {
      Some(source) => self.relay("clear", source),
      None => tracing::debug!("persistence does not support clear; skipping relay"),
    }
  }

  /// Drives a relay to completion in the background. The outcome never
  /// feeds back into cache state.
  fn relay(&self, operation: &'static str, source: Source<()>) {
    let Some(spawner) = &self.spawner else {
      tracing::warn!(operation, "no task spawner configured; persistence relay dropped");
      return;
    };
    spawner.spawn(Box::pin(async move {
      match source::drain(source).await {
        Ok(()) => tracing::trace!(operation, "persistence relay completed"),
        Err(error) => tracing::warn!(operation, %error, "persistence relay failed"),
      }
    }));
  }
}
