use crate::encoding::{EntryKey, Encoding};
use crate::error::{Result, StateError};
use crate::gate::GateState;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::shared::{StateShared, WriteOrigin};
use crate::source::{self, Source, StateStream};
use crate::store::EntryStore;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

/// A reactive, keyed, in-memory state cache.
///
/// Every single-key read and write resolves to a [`StateStream`] that yields
/// the entry's current value and then each later write to it, and completes
/// when the entry is removed, cleared or evicted. Handles are cheap to clone
/// and share one table.
///
/// Structural mistakes (an item without an identity, an identity that cannot
/// be encoded) are returned from the call itself. Anything that depends on
/// data, such as a miss or a failing source, arrives through the returned
/// stream or future.
pub struct ObservableState<T: Send + Sync, Id> {
  pub(crate) shared: Arc<StateShared<T, Id>>,
}

impl<T: Send + Sync, Id> Clone for ObservableState<T, Id> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T: Send + Sync, Id> fmt::Debug for ObservableState<T, Id> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ObservableState")
      .field("shared", &self.shared)
      .finish()
  }
}

/// One requested identity of a bulk read.
struct Request<Id> {
  key: EntryKey,
  id: Id,
  label: String,
}

impl<T, Id> ObservableState<T, Id>
where
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
  Id: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  pub fn id_property(&self) -> &str {
    &self.shared.id_property
  }

  pub fn encoding(&self) -> Encoding {
    self.shared.encoder.encoding()
  }

  pub fn time_to_live(&self) -> Option<Duration> {
    self.shared.expiry.ttl()
  }

  /// Whether a bulk load is currently running.
  pub fn gate_state(&self) -> GateState {
    self.shared.gate.state()
  }

  /// A receiver of every transition of the bulk-load gate.
  pub fn gate_changes(&self) -> watch::Receiver<GateState> {
    self.shared.gate.subscribe()
  }

  /// Reads the entry for `id`, writing `source` if it is absent.
  ///
  /// - On a hit the entry's stream is returned and `source` is ignored.
  /// - On a miss with a source, the source is written as by [`set`](Self::set).
  /// - On a miss without a source, a state built with `read_through` loads
  ///   from persistence; otherwise the stream fails with
  ///   [`StateError::ItemNotFound`].
  ///
  /// Without an identity the source is written and its items' own identities
  /// decide the keys. Without either, the stream fails with
  /// [`StateError::InvalidIdentityAndSource`].
  pub fn get(&self, id: Option<&Id>, source: Option<Source<T>>) -> Result<StateStream<Arc<T>>> {
    if id.is_none() && !self.shared.encoder.single_entity_mode() {
      return match source {
        Some(source) => self.set(source),
        None => Ok(source::failed_stream(StateError::InvalidIdentityAndSource)),
      };
    }

    let key = self.shared.key_for(id)?;
    if let Some(Source::Value(item)) = &source {
      self.shared.key_of(item)?;
    }
    let requested = self.shared.describe(id, &key);
    let id = id.cloned();
    let shared = self.shared.clone();

    let resolved = async move {
      if let Some(stream) = shared.read_idle(|store| shared.subscribe_in(store, &key)).await {
        shared.record_lookup(true);
        tracing::trace!(key = %key, "get hit");
        return stream;
      }
      match (source, id) {
        (Some(source), _) => {
          shared.record_lookup(false);
          tracing::trace!(key = %key, "get miss; writing source");
          write_stream(shared.clone(), source, false)
        }
        (None, Some(id)) if shared.read_through && shared.bridge.is_registered() => {
          shared.load(key, vec![id], requested).await
        }
        (None, _) => {
          shared.record_lookup(false);
          tracing::trace!(key = %key, "get miss");
          source::failed_stream(StateError::ItemNotFound(requested))
        }
      }
    };
    Ok(stream::once(resolved).flatten().boxed())
  }

  /// Writes every value `source` emits, replacing what is stored.
  ///
  /// The key of each value is derived from its identity property. The stream
  /// yields each value as stored.
  pub fn set(&self, source: Source<T>) -> Result<StateStream<Arc<T>>> {
    self.write(source, false)
  }

  /// Like [`set`](Self::set), but the top-level fields of each value overlay
  /// those already stored. Fields the new value lacks are kept.
  pub fn merge(&self, source: Source<T>) -> Result<StateStream<Arc<T>>> {
    self.write(source, true)
  }

  fn write(&self, source: Source<T>, merge: bool) -> Result<StateStream<Arc<T>>> {
    if let Source::Value(item) = &source {
      self.shared.key_of(item)?;
    }
    Ok(write_stream(self.shared.clone(), source, merge))
  }

  /// Writes batches of items.
  ///
  /// Unless `replace_existing` is set, items whose key is already present are
  /// left as they are and the stored value is yielded in their place.
  ///
  /// With `clear_all` set this is a bulk reload: it waits for any other bulk
  /// load, drops every entry, and holds off gated readers until the written
  /// batch (or, for a stream, the last batch) has landed.
  pub fn set_multiple(
    &self,
    source: Source<Vec<T>>,
    replace_existing: bool,
    clear_all: bool,
  ) -> Result<StateStream<Vec<Arc<T>>>> {
    if let Source::Value(items) = &source {
      for item in items {
        self.shared.key_of(item)?;
      }
    }
    let shared = self.shared.clone();

    if !clear_all {
      let writes = source
        .into_stream()
        .map(move |batch| batch.and_then(|items| shared.write_many(items, replace_existing, WriteOrigin::Caller)))
        .boxed();
      return Ok(source::until_failure(writes));
    }

    let single = source.is_single();
    let reload = stream::once(async move {
      let guard = shared.gate.acquire().await;
      let cleared = shared.clear_local();
      tracing::info!(cleared, "bulk reload started");
      (guard, shared, source)
    })
    .flat_map(move |(guard, shared, source)| {
      let mut guard = Some(guard);
      source.into_stream().map(move |batch| {
        let written = batch.and_then(|items| shared.write_many(items, replace_existing, WriteOrigin::Caller));
        // Release before yielding so the consumer can read what it wrote.
        if single || written.is_err() {
          guard.take();
        }
        written
      })
    })
    .boxed();
    Ok(source::until_failure(reload))
  }

  /// Stores `object` once per identity `id_source` emits, with the identity
  /// property set to that identity, and yields each identity.
  pub fn create(&self, object: T, id_source: Source<Id>) -> Result<StateStream<Id>> {
    let fields = self.shared.item_fields(&object)?.ok_or_else(|| {
      StateError::InvalidSource("an item must serialize to an object to carry an identity".into())
    })?;
    let shared = self.shared.clone();

    let writes = id_source
      .into_stream()
      .map(move |id| {
        let id = id?;
        let identity = serde_json::to_value(&id).map_err(|e| StateError::EncodingFailure(e.to_string()))?;
        let mut fields = fields.clone();
        fields.insert(shared.id_property.clone(), identity);
        let item: T =
          serde_json::from_value(Value::Object(fields)).map_err(|e| StateError::InvalidSource(e.to_string()))?;
        shared.write(item, false, WriteOrigin::Caller)?;
        Ok(id)
      })
      .boxed();
    Ok(source::until_failure(writes))
  }

  /// Removes the entry for `id`. Returns `false` if there was none.
  ///
  /// With `write_through`, the removal of an explicit `id` reaches
  /// persistence whether or not the entry was resident.
  pub fn remove(&self, id: Option<&Id>) -> Result<bool> {
    let key = self.shared.key_for(id)?;
    Ok(self.shared.remove(&key, id))
  }

  /// Removes every entry. Open entry streams complete.
  pub fn clear(&self) {
    self.shared.clear();
  }

  /// Whether a live entry exists for `id`. An expired entry is evicted.
  pub fn exists(&self, id: Option<&Id>) -> Result<bool> {
    let key = self.shared.key_for(id)?;
    let mut store = self.shared.store.lock();
    self.shared.evict_if_expired(&mut store, &key);
    Ok(store.contains(&key))
  }

  /// Whether the entry for `id` has outlived its TTL. Does not evict it.
  pub fn is_expired(&self, id: Option<&Id>) -> Result<bool> {
    let key = self.shared.key_for(id)?;
    let store = self.shared.store.lock();
    Ok(
      store
        .read(&key)
        .is_some_and(|entry| self.shared.expiry.is_expired(Some(entry.last_updated()))),
    )
  }

  /// The number of resident entries, including expired entries that have
  /// not been looked at since they expired.
  pub fn count(&self) -> usize {
    self.shared.store.lock().count()
  }

  /// Live values matching `predicate`, in insertion order.
  pub async fn filter<F>(&self, mut predicate: F) -> Vec<Arc<T>>
  where
    F: FnMut(&T) -> bool,
  {
    self.shared.read_idle(|store| self.shared.collect(store, &mut predicate)).await
  }

  pub async fn get_all(&self) -> Vec<Arc<T>> {
    self.filter(|_| true).await
  }

  /// The identities of all live values, in insertion order. Values without
  /// an identity property are skipped.
  pub async fn get_all_ids(&self) -> Result<Vec<Id>> {
    let values = self.get_all().await;
    values
      .iter()
      .filter_map(|value| match self.shared.identity_of(value) {
        Ok(Some(id)) => Some(serde_json::from_value(id).map_err(|e| StateError::EncodingFailure(e.to_string()))),
        Ok(None) => None,
        Err(error) => Some(Err(error)),
      })
      .collect()
  }

  /// Reads the entries for `ids`, in the order given.
  ///
  /// A missing entry fails the whole read when `break_on_not_found` is set
  /// and is omitted otherwise. An empty `ids` resolves to an empty list.
  pub fn get_multiple(
    &self,
    ids: &[Id],
    break_on_not_found: bool,
  ) -> Result<BoxFuture<'static, Result<Vec<Arc<T>>>>> {
    let requests = self.requests(ids)?;
    let shared = self.shared.clone();

    Ok(
      async move {
        if requests.is_empty() {
          return Ok(Vec::new());
        }
        shared
          .read_idle(|store| collect_requested(&shared, store, &requests, break_on_not_found))
          .await
      }
      .boxed(),
    )
  }

  /// Reads the entry for `id`, loading it from persistence on a miss.
  ///
  /// Concurrent loads of the same identity share one persistence call.
  pub fn load(&self, id: Option<&Id>) -> Result<StateStream<Arc<T>>> {
    let key = self.shared.key_for(id)?;
    let requested = self.shared.describe(id, &key);
    let ids: Vec<Id> = id.into_iter().cloned().collect();
    let shared = self.shared.clone();

    let resolved = async move { shared.load(key, ids, requested).await };
    Ok(stream::once(resolved).flatten().boxed())
  }

  /// Like [`get_multiple`](Self::get_multiple), but every identity that
  /// misses is fetched from persistence in a single call first.
  pub fn load_multiple(
    &self,
    ids: &[Id],
    break_on_not_found: bool,
  ) -> Result<BoxFuture<'static, Result<Vec<Arc<T>>>>> {
    let requests = self.requests(ids)?;
    let shared = self.shared.clone();

    Ok(
      async move {
        if requests.is_empty() {
          return Ok(Vec::new());
        }
        let missing: Vec<Id> = shared
          .read_idle(|store| {
            requests
              .iter()
              .filter(|request| {
                shared.evict_if_expired(store, &request.key);
                !store.contains(&request.key)
              })
              .map(|request| request.id.clone())
              .collect()
          })
          .await;

        if !missing.is_empty() {
          Metrics::incr(&shared.metrics.persistence_loads);
          tracing::debug!(missing = missing.len(), "loading entries from persistence");
          let label = format!("{} identities", missing.len());
          let fetched = shared
            .bridge
            .fetch_by_ids(missing, label)
            .next()
            .await
            .unwrap_or_else(|| Ok(Vec::new()));
          match fetched {
            Ok(items) => {
              shared.write_many(items, true, WriteOrigin::Persistence)?;
            }
            // Whatever is still missing is handled below.
            Err(StateError::ItemNotFound(_)) => {}
            Err(error) => return Err(error),
          }
        }

        let mut store = shared.store.lock();
        collect_requested(&shared, &mut store, &requests, break_on_not_found)
      }
      .boxed(),
    )
  }

  /// Fetches every item from persistence and writes it into the table.
  ///
  /// Other bulk loads wait for this one, and gated readers see the table only
  /// once every item has landed. Items already resident are replaced; items
  /// the persistence layer does not return are kept.
  pub async fn load_all(&self) -> Result<Vec<Arc<T>>> {
    let _guard = self.shared.gate.acquire().await;
    Metrics::incr(&self.shared.metrics.persistence_loads);
    tracing::info!("bulk load from persistence started");

    let items = self
      .shared
      .bridge
      .fetch_all()
      .next()
      .await
      .unwrap_or_else(|| Ok(Vec::new()))?;
    let values = self.shared.write_many(items, true, WriteOrigin::Persistence)?;

    tracing::info!(loaded = values.len(), "bulk load from persistence finished");
    Ok(values)
  }

  fn requests(&self, ids: &[Id]) -> Result<Vec<Request<Id>>> {
    ids
      .iter()
      .map(|id| {
        let key = self.shared.key_for(Some(id))?;
        let label = self.shared.describe(Some(id), &key);
        Ok(Request {
          key,
          id: id.clone(),
          label,
        })
      })
      .collect()
  }
}

fn write_stream<T, Id>(shared: Arc<StateShared<T, Id>>, source: Source<T>, merge: bool) -> StateStream<Arc<T>>
where
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
  Id: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  let writes = source
    .into_stream()
    .map(move |item| item.and_then(|item| shared.write(item, merge, WriteOrigin::Caller)))
    .boxed();
  source::until_failure(writes)
}

fn collect_requested<T, Id>(
  shared: &StateShared<T, Id>,
  store: &mut EntryStore<T>,
  requests: &[Request<Id>],
  break_on_not_found: bool,
) -> Result<Vec<Arc<T>>>
where
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
  Id: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  let mut found = Vec::with_capacity(requests.len());
  for request in requests {
    match shared.lookup(store, &request.key) {
      Some(value) => found.push(value),
      None if break_on_not_found => return Err(StateError::ItemNotFound(request.label.clone())),
      None => {}
    }
  }
  Ok(found)
}
