use std::time::Duration;

pub use tokio::time::Instant;

// All timestamps go through Tokio's clock so a paused test runtime can
// advance time deterministically.

/// Returns the current instant.
#[inline]
pub(crate) fn now() -> Instant {
  Instant::now()
}

/// Time elapsed between `earlier` and `now`, zero if `earlier` is in the future.
#[inline]
pub(crate) fn elapsed_between(earlier: Instant, now: Instant) -> Duration {
  now.saturating_duration_since(earlier)
}
