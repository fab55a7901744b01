use std::fmt;

use thiserror::Error;

/// Errors that can occur when building a state cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// The `id_property` was empty. Every stored item derives its identity from
  /// this field, so it must name one.
  EmptyIdProperty,
  /// A persistence contract was registered, but no `TaskSpawner` was
  /// configured and no Tokio runtime was available to relay writes on.
  SpawnerRequired,
  /// The declarative `StateOptions` contained a value that could not be used.
  InvalidOptions(String),
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::EmptyIdProperty => write!(f, "id property cannot be empty"),
      BuildError::SpawnerRequired => write!(
        f,
        "a persistence contract requires a task spawner or a running Tokio runtime"
      ),
      BuildError::InvalidOptions(reason) => write!(f, "invalid state options: {}", reason),
    }
  }
}

impl std::error::Error for BuildError {}

/// Failures reported by state cache operations.
///
/// Structural errors (`MissingIdentity`, `EncodingFailure`, `InvalidSource` for
/// already-resolved values) are returned synchronously from the call itself.
/// Data-availability errors are delivered through the returned stream or
/// future, alongside successful values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
  /// No identity was supplied and the cache is not in single-entity mode.
  #[error("missing identity")]
  MissingIdentity,

  /// The identity could not be serialized into a key.
  #[error("identity could not be encoded: {0}")]
  EncodingFailure(String),

  /// A written value could not be turned into a cache entry.
  #[error("invalid source: {0}")]
  InvalidSource(String),

  /// Nothing was found for the requested identity.
  #[error("item not found: {0}")]
  ItemNotFound(String),

  /// `get` was called with neither an identity nor a source.
  #[error("neither an identity nor a source was given")]
  InvalidIdentityAndSource,

  /// The operation needed a persistence contract but none is registered.
  #[error("no persistence contract is registered")]
  PersistenceUnavailable,

  /// A bulk operation was given input it cannot work on.
  ///
  /// Bulk inputs are typed slices, so no current operation returns this.
  #[error("invalid bulk input: {0}")]
  InvalidBulkInput(String),

  /// A caller-supplied or persistence source reported a failure.
  #[error("source failed: {0}")]
  SourceFailed(String),
}

/// A specialized `Result` type for state cache operations.
pub type Result<T, E = StateError> = std::result::Result<T, E>;
