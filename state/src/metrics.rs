use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the state cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Writes ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) updates: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Eviction / Loading ---
  pub(crate) evicted_by_ttl: CachePadded<AtomicU64>,
  pub(crate) persistence_loads: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      updates: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      evicted_by_ttl: CachePadded::new(AtomicU64::new(0)),
      persistence_loads: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &CachePadded<AtomicU64>) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      inserts: self.inserts.load(Ordering::Relaxed),
      updates: self.updates.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      evicted_by_ttl: self.evicted_by_ttl.load(Ordering::Relaxed),
      persistence_loads: self.persistence_loads.load(Ordering::Relaxed),
      uptime: self.created_at.elapsed(),
    }
  }
}

/// A public, point-in-time snapshot of the cache's metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
  /// Lookups that found a live entry.
  pub hits: u64,
  /// Lookups that found nothing or an expired entry.
  pub misses: u64,
  pub hit_ratio: f64,
  /// Writes that created an entry.
  pub inserts: u64,
  /// Writes that replaced or merged into an existing entry.
  pub updates: u64,
  /// Entries removed by `remove`.
  pub invalidations: u64,
  /// Entries evicted because their TTL ran out.
  pub evicted_by_ttl: u64,
  /// Read-through or bulk loads that reached persistence.
  pub persistence_loads: u64,
  pub uptime: Duration,
}

impl fmt::Display for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "hits={} misses={} hit_ratio={:.2} inserts={} updates={} invalidations={} evicted_by_ttl={} persistence_loads={} uptime={:?}",
      self.hits,
      self.misses,
      self.hit_ratio,
      self.inserts,
      self.updates,
      self.invalidations,
      self.evicted_by_ttl,
      self.persistence_loads,
      self.uptime
    )
  }
}
