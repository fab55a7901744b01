use crate::encoding::{EntryKey, KeyEncoder};
use crate::entry::EntrySnapshot;
use crate::error::{Result, StateError};
use crate::expiry::ExpiryPolicy;
use crate::gate::{GateState, LoadGate};
use crate::listener::{StateChange, StateOperation};
use crate::loader::{LoadOutcome, LoadRole, PendingLoads};
use crate::metrics::Metrics;
use crate::persistence::PersistenceBridge;
use crate::source::{self, StateStream};
use crate::store::EntryStore;
use crate::task::notifier::Notifier;

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Where a write came from. Writes fed back from persistence are not relayed
/// to it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOrigin {
  Caller,
  Persistence,
}

/// The internal, thread-safe core of an observable state.
pub(crate) struct StateShared<T: Send + Sync, Id> {
  pub(crate) id_property: String,
  pub(crate) encoder: KeyEncoder,
  pub(crate) expiry: ExpiryPolicy,
  pub(crate) read_through: bool,
  pub(crate) write_through: bool,
  pub(crate) store: Mutex<EntryStore<T>>,
  pub(crate) gate: Arc<LoadGate>,
  pub(crate) pending_loads: PendingLoads,
  pub(crate) bridge: PersistenceBridge<T, Id>,
  pub(crate) notifier: Option<Notifier<T>>,
  pub(crate) metrics: Metrics,
}

impl<T: Send + Sync, Id> fmt::Debug for StateShared<T, Id> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StateShared")
      .field("id_property", &self.id_property)
      .field("encoder", &self.encoder)
      .field("ttl", &self.expiry.ttl())
      .field("read_through", &self.read_through)
      .field("write_through", &self.write_through)
      .field("gate", &self.gate)
      .field("pending_loads", &self.pending_loads.len())
      .field("bridge", &self.bridge)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<T, Id> StateShared<T, Id>
where
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
  Id: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  /// The JSON form of `item`, which must be an object to carry an identity.
  pub(crate) fn item_fields(&self, item: &T) -> Result<Option<Map<String, Value>>> {
    match serde_json::to_value(item) {
      Ok(Value::Null) => Err(StateError::InvalidSource("item serialized to null".into())),
      Ok(Value::Object(fields)) => Ok(Some(fields)),
      Ok(_) => Ok(None),
      Err(e) => Err(StateError::InvalidSource(e.to_string())),
    }
  }

  /// The value of the identity property of `item`, if it has one.
  pub(crate) fn identity_of(&self, item: &T) -> Result<Option<Value>> {
    Ok(
      self
        .item_fields(item)?
        .and_then(|mut fields| fields.remove(&self.id_property))
        .filter(|id| !id.is_null()),
    )
  }

  /// The key `item` is stored under.
  pub(crate) fn key_of(&self, item: &T) -> Result<EntryKey> {
    if self.encoder.single_entity_mode() {
      // The identity is irrelevant, but the item still has to be storable.
      self.item_fields(item)?;
      return self.encoder.encode_value(None);
    }
    let identity = self.identity_of(item)?;
    self.encoder.encode_value(identity.as_ref())
  }

  #[inline]
  pub(crate) fn key_for(&self, id: Option<&Id>) -> Result<EntryKey> {
    self.encoder.encode(id)
  }

  /// A human-readable name for an identity, used in not-found errors.
  pub(crate) fn describe(&self, id: Option<&Id>, key: &EntryKey) -> String {
    id.and_then(|id| serde_json::to_string(id).ok())
      .unwrap_or_else(|| key.to_string())
  }

  pub(crate) fn notify(&self, operation: StateOperation, key: Option<EntryKey>, entry: EntrySnapshot<T>) {
    if let Some(notifier) = &self.notifier {
      notifier.notify(StateChange {
        operation,
        key,
        entry,
      });
    }
  }

  /// Removes the entry for `key` if its TTL has run out. Returns `true` if
  /// an entry was evicted.
  pub(crate) fn evict_if_expired(&self, store: &mut EntryStore<T>, key: &EntryKey) -> bool {
    let expired = store
      .read(key)
      .is_some_and(|entry| self.expiry.is_expired(Some(entry.last_updated())));
    if !expired {
      return false;
    }
    // Dropping the entry drops its channel, which completes its streams.
    store.remove(key);
    Metrics::incr(&self.metrics.evicted_by_ttl);
    tracing::debug!(key = %key, "entry evicted after its ttl ran out");
    self.notify(StateOperation::Remove, Some(key.clone()), EntrySnapshot::removed());
    true
  }

  /// Subscribes to the live entry for `key`, evicting it first if expired.
  pub(crate) fn subscribe(&self, key: &EntryKey) -> Option<StateStream<Arc<T>>> {
    self.subscribe_in(&mut self.store.lock(), key)
  }

  pub(crate) fn subscribe_in(&self, store: &mut EntryStore<T>, key: &EntryKey) -> Option<StateStream<Arc<T>>> {
    self.evict_if_expired(store, key);
    store.read(key).map(|entry| entry.subscribe())
  }

  /// Runs `read` against the table once no bulk load is running.
  ///
  /// The gate is checked again under the store lock. A bulk load flips the
  /// gate before it touches the table, so a read that sees the gate idle
  /// here cannot observe a half-finished reload.
  pub(crate) async fn read_idle<R>(&self, mut read: impl FnMut(&mut EntryStore<T>) -> R) -> R {
    loop {
      self.gate.wait_idle().await;
      let mut store = self.store.lock();
      if self.gate.state() == GateState::Idle {
        return read(&mut store);
      }
    }
  }

  /// The current value for `key`, evicting it first if expired.
  pub(crate) fn lookup(&self, store: &mut EntryStore<T>, key: &EntryKey) -> Option<Arc<T>> {
    self.evict_if_expired(store, key);
    let found = store.read(key).map(|entry| entry.value());
    match found {
      Some(_) => Metrics::incr(&self.metrics.hits),
      None => Metrics::incr(&self.metrics.misses),
    }
    found
  }

  /// Counts a single-key read as a hit or a miss.
  pub(crate) fn record_lookup(&self, hit: bool) {
    if hit {
      Metrics::incr(&self.metrics.hits);
    } else {
      Metrics::incr(&self.metrics.misses);
    }
  }

  fn apply_write(&self, store: &mut EntryStore<T>, key: EntryKey, item: T, merge: bool) -> Result<Arc<T>> {
    self.evict_if_expired(store, &key);
    let outcome = store.write(key.clone(), item, merge)?;
    if outcome.created {
      Metrics::incr(&self.metrics.inserts);
    } else {
      Metrics::incr(&self.metrics.updates);
    }
    tracing::trace!(key = %key, created = outcome.created, merge, "entry written");
    self.notify(StateOperation::Set, Some(key), outcome.snapshot);
    Ok(outcome.value)
  }

  /// Writes (or merges) one item and relays it to persistence.
  pub(crate) fn write(&self, item: T, merge: bool, origin: WriteOrigin) -> Result<Arc<T>> {
    let key = self.key_of(&item)?;
    let value = {
      let mut store = self.store.lock();
      self.apply_write(&mut store, key, item, merge)?
    };
    if origin == WriteOrigin::Caller {
      self.relay_write(vec![value.clone()]);
    }
    Ok(value)
  }

  /// Writes a batch under one lock. Every item is validated before any is
  /// written. Items whose key is already present are left untouched unless
  /// `replace_existing` is set; the resident value is returned for them.
  pub(crate) fn write_many(&self, items: Vec<T>, replace_existing: bool, origin: WriteOrigin) -> Result<Vec<Arc<T>>> {
    let keyed = items
      .into_iter()
      .map(|item| Ok((self.key_of(&item)?, item)))
      .collect::<Result<Vec<_>>>()?;

    let mut values = Vec::with_capacity(keyed.len());
    let mut written = Vec::new();
    {
      let mut store = self.store.lock();
      for (key, item) in keyed {
        if !replace_existing {
          self.evict_if_expired(&mut store, &key);
          if let Some(existing) = store.read(&key) {
            values.push(existing.value());
            continue;
          }
        }
        let value = self.apply_write(&mut store, key, item, false)?;
        written.push(value.clone());
        values.push(value);
      }
    }

    if origin == WriteOrigin::Caller {
      self.relay_write(written);
    }
    Ok(values)
  }

  fn relay_write(&self, values: Vec<Arc<T>>) {
    if self.write_through && !values.is_empty() {
      self.bridge.persist_write(values);
    }
  }

  /// Removes the entry for `key`, relaying the removal for `id` (or, in
  /// single-entity mode, the identity carried by the removed item).
  ///
  /// An explicit `id` is relayed even when nothing was resident, so an item
  /// that was never loaded cannot come back through a later load. Returns
  /// whether an entry was resident.
  pub(crate) fn remove(&self, key: &EntryKey, id: Option<&Id>) -> bool {
    let removed = self.store.lock().remove(key);
    if removed.is_some() {
      Metrics::incr(&self.metrics.invalidations);
      tracing::debug!(key = %key, "entry removed");
      self.notify(StateOperation::Remove, Some(key.clone()), EntrySnapshot::removed());
    }

    if self.write_through {
      let id = match (id, &removed) {
        (Some(id), _) => Some(id.clone()),
        (None, Some(entry)) => self
          .identity_of(entry.data())
          .ok()
          .flatten()
          .and_then(|id| serde_json::from_value(id).ok()),
        (None, None) => None,
      };
      if let Some(id) = id {
        self.bridge.persist_remove(vec![id]);
      }
    }
    removed.is_some()
  }

  /// Drops every entry locally. Returns how many were resident.
  pub(crate) fn clear_local(&self) -> usize {
    let cleared = self.store.lock().clear();
    self.notify(StateOperation::Clear, None, EntrySnapshot::removed());
    cleared
  }

  pub(crate) fn clear(&self) -> usize {
    let cleared = self.clear_local();
    tracing::debug!(cleared, "state cleared");
    if self.write_through {
      self.bridge.persist_clear();
    }
    cleared
  }

  /// Live values matching `predicate`, in insertion order. Expired entries
  /// are skipped but left in place.
  pub(crate) fn collect<F>(&self, store: &EntryStore<T>, mut predicate: F) -> Vec<Arc<T>>
  where
    F: FnMut(&T) -> bool,
  {
    store
      .iter_ordered()
      .filter(|(_, entry)| !self.expiry.is_expired(Some(entry.last_updated())))
      .filter(|(_, entry)| predicate(entry.data()))
      .map(|(_, entry)| entry.value())
      .collect()
  }

  /// Resolves `key` through persistence if it is not resident.
  ///
  /// Concurrent loads of one key share a single persistence call: the first
  /// caller fetches, the rest wait for it and then read the table. A leader
  /// that is dropped mid-fetch hands the load to the next waiter.
  pub(crate) async fn load(&self, key: EntryKey, ids: Vec<Id>, requested: String) -> StateStream<Arc<T>> {
    let mut counted = false;
    loop {
      if let Some(stream) = self.read_idle(|store| self.subscribe_in(store, &key)).await {
        if !counted {
          self.record_lookup(true);
        }
        return stream;
      }
      if !counted {
        self.record_lookup(false);
        counted = true;
      }

      match self.pending_loads.join(&key) {
        LoadRole::Follower(pending) => match (&*pending).await {
          LoadOutcome::Loaded | LoadOutcome::Abandoned => continue,
          LoadOutcome::Failed(error) => return source::failed_stream(error),
        },
        LoadRole::Leader(leader) => {
          Metrics::incr(&self.metrics.persistence_loads);
          tracing::debug!(key = %key, "loading entry from persistence");

          let fetched = self
            .bridge
            .fetch_by_ids(ids.clone(), requested.clone())
            .next()
            .await
            .unwrap_or_else(|| Err(StateError::ItemNotFound(requested.clone())));
          let written = fetched.and_then(|items| self.write_many(items, true, WriteOrigin::Persistence));

          match written {
            Ok(_) => {
              leader.finish(LoadOutcome::Loaded);
              return match self.subscribe(&key) {
                Some(stream) => stream,
                None => source::failed_stream(StateError::ItemNotFound(requested)),
              };
            }
            Err(error) => {
              tracing::debug!(key = %key, %error, "load from persistence failed");
              leader.finish(LoadOutcome::Failed(error.clone()));
              return source::failed_stream(error);
            }
          }
        }
      }
    }
  }
}
