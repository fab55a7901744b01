use crate::time::{self, Instant};

use std::time::Duration;

/// One hour, the expiry window some deployments of this cache have used as
/// their default. TTL is disabled unless a window is configured explicitly.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Decides whether an entry is stale given its last-write timestamp.
///
/// Expiry is lazy: it is only evaluated when a key is addressed, never by a
/// background sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryPolicy {
  ttl: Option<Duration>,
}

impl ExpiryPolicy {
  pub fn new(ttl: Option<Duration>) -> Self {
    Self { ttl }
  }

  pub fn ttl(&self) -> Option<Duration> {
    self.ttl
  }

  /// Returns `true` iff a TTL is set, a timestamp exists, and at least `ttl`
  /// has elapsed since it.
  #[inline]
  pub fn is_expired(&self, last_updated: Option<Instant>) -> bool {
    self.is_expired_at(last_updated, time::now())
  }

  #[inline]
  pub(crate) fn is_expired_at(&self, last_updated: Option<Instant>, now: Instant) -> bool {
    match (self.ttl, last_updated) {
      (Some(ttl), Some(last_updated)) => time::elapsed_between(last_updated, now) >= ttl,
      _ => false,
    }
  }
}
