//! A reactive, keyed, in-memory state cache for async Rust.
//!
//! Items are stored under a key derived from one of their own fields. Every
//! read and write hands back a stream that replays the latest value of the
//! entry and then follows it, so consumers stay in sync with the table
//! without polling.
//!
//! # Features
//! - **Replay-latest streams**: each entry broadcasts over its own channel;
//!   late subscribers see the current value first.
//! - **Deterministic keys**: identities are canonicalized to JSON and
//!   optionally encoded as base64, MD5 or SHA-1.
//! - **TTL expiry**: evaluated lazily whenever a key is addressed.
//! - **Persistence fallback**: misses can load through a pluggable
//!   [`Persistence`] contract, with concurrent loads of one key coalesced.
//! - **Single-flight bulk reloads**: readers never see a table halfway
//!   through a full refresh.
//! - **Observability**: change listeners and detailed metrics.

// Public modules that form the API
pub mod builder;
pub mod encoding;
pub mod error;
pub mod expiry;
pub mod handles;
pub mod listener;
pub mod metrics;
pub mod persistence;
pub mod runtime;
pub mod source;

// Internal, crate-only modules
mod entry;
mod gate;
mod loader;
mod shared;
mod store;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::{StateBuilder, StateOptions};
pub use encoding::{Encoding, EntryKey, KeyEncoder, SINGLE_ENTITY_SENTINEL};
pub use entry::EntrySnapshot;
pub use error::{BuildError, Result, StateError};
pub use expiry::{ExpiryPolicy, DEFAULT_TTL};
pub use gate::GateState;
pub use handles::ObservableState;
pub use listener::{ChangeListener, StateChange, StateOperation};
pub use metrics::MetricsSnapshot;
pub use persistence::Persistence;
#[cfg(feature = "rt")]
pub use runtime::TokioSpawner;
pub use runtime::TaskSpawner;
pub use source::{Source, StateStream};
pub use time::Instant;
