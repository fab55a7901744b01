use crate::encoding::{Encoding, KeyEncoder};
use crate::error::BuildError;
use crate::expiry::ExpiryPolicy;
use crate::gate::LoadGate;
use crate::handles::ObservableState;
use crate::listener::ChangeListener;
use crate::loader::PendingLoads;
use crate::metrics::Metrics;
use crate::persistence::{Persistence, PersistenceBridge};
use crate::shared::StateShared;
use crate::store::EntryStore;
use crate::task::notifier::Notifier;
use crate::TaskSpawner;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Declarative configuration for a [`StateBuilder`], typically read from a
/// config file.
///
/// ```json
/// { "id_property": "id", "encoding": "md5", "ttl": "15m", "read_through": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateOptions {
  #[serde(alias = "idProperty")]
  pub id_property: String,
  #[serde(default, alias = "singleEntityMode")]
  pub single_entity_mode: bool,
  #[serde(default)]
  pub encoding: Encoding,
  /// A human-readable duration such as `"90s"` or `"1h 30m"`.
  #[serde(default, deserialize_with = "deserialize_ttl")]
  pub ttl: Option<Duration>,
  #[serde(default, alias = "readThrough")]
  pub read_through: bool,
  #[serde(default = "default_write_through", alias = "writeThrough")]
  pub write_through: bool,
}

fn default_write_through() -> bool {
  true
}

fn deserialize_ttl<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw: Option<String> = Option::deserialize(deserializer)?;
  raw
    .map(|text| humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom))
    .transpose()
}

impl StateOptions {
  /// Parses options from a JSON document.
  pub fn from_json(text: &str) -> Result<Self, BuildError> {
    serde_json::from_str(text).map_err(|e| BuildError::InvalidOptions(e.to_string()))
  }
}

/// A builder for creating [`ObservableState`] instances.
pub struct StateBuilder<T, Id> {
  id_property: String,
  single_entity_mode: bool,
  encoding: Encoding,
  time_to_live: Option<Duration>,
  read_through: bool,
  write_through: bool,
  persistence: Option<Arc<dyn Persistence<T, Id>>>,
  listener: Option<Arc<dyn ChangeListener<T>>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

impl<T, Id> fmt::Debug for StateBuilder<T, Id> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StateBuilder")
      .field("id_property", &self.id_property)
      .field("single_entity_mode", &self.single_entity_mode)
      .field("encoding", &self.encoding)
      .field("time_to_live", &self.time_to_live)
      .field("read_through", &self.read_through)
      .field("write_through", &self.write_through)
      .field("has_persistence", &self.persistence.is_some())
      .field("has_listener", &self.listener.is_some())
      .finish_non_exhaustive()
  }
}

impl<T, Id> StateBuilder<T, Id> {
  /// Starts a builder for items identified by the field `id_property`.
  pub fn new(id_property: impl Into<String>) -> Self {
    Self {
      id_property: id_property.into(),
      single_entity_mode: false,
      encoding: Encoding::default(),
      time_to_live: None,
      read_through: false,
      write_through: true,
      persistence: None,
      listener: None,
      spawner: None,
    }
  }

  /// Starts a builder from declarative options.
  pub fn from_options(options: StateOptions) -> Self {
    let builder = Self::new(options.id_property)
      .single_entity_mode(options.single_entity_mode)
      .encoding(options.encoding)
      .read_through(options.read_through)
      .write_through(options.write_through);
    match options.ttl {
      Some(ttl) => builder.time_to_live(ttl),
      None => builder,
    }
  }

  /// Stores at most one item, under a fixed key, ignoring identities.
  pub fn single_entity_mode(mut self, enabled: bool) -> Self {
    self.single_entity_mode = enabled;
    self
  }

  /// Sets how identities are turned into keys. Defaults to [`Encoding::Plain`].
  pub fn encoding(mut self, encoding: Encoding) -> Self {
    self.encoding = encoding;
    self
  }

  /// Sets a time-to-live for every entry, measured from its last write.
  ///
  /// Expiry is disabled unless this is called.
  pub fn time_to_live(mut self, duration: Duration) -> Self {
    self.time_to_live = Some(duration);
    self
  }

  /// When enabled, a `get` that misses without a source falls through to
  /// persistence, as [`ObservableState::load`] does.
  pub fn read_through(mut self, enabled: bool) -> Self {
    self.read_through = enabled;
    self
  }

  /// Whether local writes, removals and clears are relayed to persistence.
  /// Enabled by default; has no effect without persistence.
  pub fn write_through(mut self, enabled: bool) -> Self {
    self.write_through = enabled;
    self
  }

  /// Registers the persistence layer misses fall back to.
  pub fn persistence<P>(mut self, persistence: P) -> Self
  where
    P: Persistence<T, Id>,
  {
    self.persistence = Some(Arc::new(persistence));
    self
  }

  /// Registers a listener that observes every change to the table.
  pub fn change_listener<L>(mut self, listener: L) -> Self
  where
    L: ChangeListener<T> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Sets the spawner persistence relays run on. Without one, the current
  /// Tokio runtime is used.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }
}

impl<T, Id> StateBuilder<T, Id>
where
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
  Id: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  /// Builds the state.
  ///
  /// Fails if the identity property is empty, or if persistence relays are
  /// enabled but no spawner was set and no Tokio runtime is running.
  pub fn build(self) -> Result<ObservableState<T, Id>, BuildError> {
    if self.id_property.trim().is_empty() {
      return Err(BuildError::EmptyIdProperty);
    }

    let needs_spawner = self.persistence.is_some() && self.write_through;
    let spawner = match self.spawner {
      Some(spawner) => Some(spawner),
      None if needs_spawner => Some(Self::default_spawner()?),
      None => None,
    };

    let notifier = self.listener.map(Notifier::spawn);

    let shared = StateShared {
      id_property: self.id_property,
      encoder: KeyEncoder::new(self.encoding, self.single_entity_mode),
      expiry: ExpiryPolicy::new(self.time_to_live),
      read_through: self.read_through,
      write_through: self.write_through,
      store: Mutex::new(EntryStore::new()),
      gate: Arc::new(LoadGate::new()),
      pending_loads: PendingLoads::new(),
      bridge: PersistenceBridge::new(self.persistence, spawner),
      notifier,
      metrics: Metrics::new(),
    };

    tracing::debug!(
      id_property = %shared.id_property,
      encoding = %shared.encoder.encoding(),
      single_entity_mode = shared.encoder.single_entity_mode(),
      ttl = ?shared.expiry.ttl(),
      "observable state built"
    );

    Ok(ObservableState {
      shared: Arc::new(shared),
    })
  }

  #[cfg(feature = "rt")]
  fn default_spawner() -> Result<Arc<dyn TaskSpawner>, BuildError> {
    crate::TokioSpawner::try_current()
      .map(|spawner| Arc::new(spawner) as Arc<dyn TaskSpawner>)
      .ok_or(BuildError::SpawnerRequired)
  }

  #[cfg(not(feature = "rt"))]
  fn default_spawner() -> Result<Arc<dyn TaskSpawner>, BuildError> {
    Err(BuildError::SpawnerRequired)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn options_parse_human_readable_ttl() {
    let options =
      StateOptions::from_json(r#"{ "idProperty": "uuid", "encoding": "sha1", "ttl": "1m 30s" }"#).unwrap();
    assert_eq!(options.id_property, "uuid");
    assert_eq!(options.encoding, Encoding::Sha1);
    assert_eq!(options.ttl, Some(Duration::from_secs(90)));
    assert!(!options.single_entity_mode);
    assert!(!options.read_through);
    assert!(options.write_through);
  }

  #[test]
  fn options_reject_garbage() {
    let bad_ttl = StateOptions::from_json(r#"{ "id_property": "id", "ttl": "soon" }"#);
    assert!(matches!(bad_ttl, Err(BuildError::InvalidOptions(_))));

    let bad_encoding = StateOptions::from_json(r#"{ "id_property": "id", "encoding": "rot13" }"#);
    assert!(matches!(bad_encoding, Err(BuildError::InvalidOptions(_))));
  }

  #[test]
  fn empty_id_property_is_rejected() {
    let result = StateBuilder::<serde_json::Value, u32>::new("  ").build();
    assert!(matches!(result, Err(BuildError::EmptyIdProperty)));
  }
}
