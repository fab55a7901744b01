use crate::source::StateStream;
use crate::time::{self, Instant};

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A point-in-time view of one entry, as broadcast to change listeners.
#[derive(Debug)]
pub struct EntrySnapshot<T> {
  /// The stored value. `None` once the entry has been removed.
  pub data: Option<Arc<T>>,
  /// When the entry was last written. `None` once the entry has been removed.
  pub last_updated: Option<Instant>,
}

// Manual impl so that `T` does not need to be `Clone`.
impl<T> Clone for EntrySnapshot<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      last_updated: self.last_updated,
    }
  }
}

impl<T> EntrySnapshot<T> {
  pub(crate) fn removed() -> Self {
    Self {
      data: None,
      last_updated: None,
    }
  }
}

/// A container for one cached value and the channel that broadcasts it.
pub(crate) struct CacheEntry<T> {
  data: Arc<T>,
  last_updated: Instant,
  /// Position in the table's insertion order.
  seq: u64,
  /// Replays the latest value to every new subscriber. Dropping the entry
  /// drops the sender, which completes all open subscriber streams.
  channel: watch::Sender<Arc<T>>,
}

impl<T> fmt::Debug for CacheEntry<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("seq", &self.seq)
      .field("last_updated", &self.last_updated)
      .field("subscribers", &self.channel.receiver_count())
      .finish_non_exhaustive()
  }
}

impl<T: Send + Sync + 'static> CacheEntry<T> {
  /// Creates a new `CacheEntry` stamped with the current time.
  pub(crate) fn new(data: Arc<T>, seq: u64) -> Self {
    let (channel, _) = watch::channel(data.clone());
    Self {
      data,
      last_updated: time::now(),
      seq,
      channel,
    }
  }

  /// Replaces the value and broadcasts it. The timestamp never moves
  /// backwards.
  pub(crate) fn replace(&mut self, data: Arc<T>) {
    self.last_updated = self.last_updated.max(time::now());
    self.data = data.clone();
    // `send_replace` stores the value even when nobody is subscribed.
    self.channel.send_replace(data);
  }

  #[inline]
  pub(crate) fn value(&self) -> Arc<T> {
    self.data.clone()
  }

  #[inline]
  pub(crate) fn data(&self) -> &T {
    &self.data
  }

  #[inline]
  pub(crate) fn last_updated(&self) -> Instant {
    self.last_updated
  }

  #[inline]
  pub(crate) fn seq(&self) -> u64 {
    self.seq
  }

  pub(crate) fn snapshot(&self) -> EntrySnapshot<T> {
    EntrySnapshot {
      data: Some(self.data.clone()),
      last_updated: Some(self.last_updated),
    }
  }

  /// Returns a stream that yields the current value immediately and then
  /// every subsequent write, completing when the entry goes away.
  pub(crate) fn subscribe(&self) -> StateStream<Arc<T>> {
    WatchStream::new(self.channel.subscribe()).map(Ok).boxed()
  }
}
