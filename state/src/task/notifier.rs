use crate::listener::{ChangeListener, StateChange};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fibre::mpsc;

/// Bound on queued notifications. Further changes are dropped until the
/// listener catches up.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// The background thread responsible for calling the user's change listener.
pub(crate) struct Notifier<T: Send + Sync> {
  handle: Option<JoinHandle<()>>,
  sender: mpsc::BoundedSender<StateChange<T>>,
}

impl<T: Send + Sync + 'static> Notifier<T> {
  /// Spawns a new notifier thread.
  pub(crate) fn spawn(listener: Arc<dyn ChangeListener<T>>) -> Self {
    let (tx, rx): (
      mpsc::BoundedSender<StateChange<T>>,
      mpsc::BoundedReceiver<StateChange<T>>,
    ) = mpsc::bounded(NOTIFICATION_CHANNEL_CAPACITY);

    let handle = thread::Builder::new()
      .name("fibre-state-notifier".into())
      .spawn(move || {
        // Ends once the sender is dropped together with the cache.
        while let Ok(change) = rx.recv() {
          listener.on_change(change);
        }
      })
      .map_err(|e| tracing::warn!(error = %e, "could not spawn notifier thread"))
      .ok();

    Self { handle, sender: tx }
  }

  /// Queues a change without blocking. Returns `false` if it was dropped.
  pub(crate) fn notify(&self, change: StateChange<T>) -> bool {
    if self.handle.is_none() {
      return false;
    }
    match self.sender.try_send(change) {
      Ok(()) => true,
      Err(_) => {
        tracing::trace!("change notification dropped; listener is behind");
        false
      }
    }
  }
}
