use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// The state of a store's bulk-load gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateState {
  /// No bulk load is running; readers proceed immediately.
  Idle,
  /// A bulk load is running; gated readers wait for it to finish.
  Loading,
}

impl fmt::Display for GateState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GateState::Idle => f.write_str("idle"),
      GateState::Loading => f.write_str("loading"),
    }
  }
}

/// Serializes bulk loads for one store.
///
/// Only operations that hold a [`LoadGuard`] exclude each other. Readers call
/// [`LoadGate::wait_idle`] so they never look at a table that is halfway
/// through a reload. Single-key writes ignore the gate entirely.
///
/// The gate is not reentrant: acquiring it while holding it never completes.
pub(crate) struct LoadGate {
  state: watch::Sender<GateState>,
}

impl fmt::Debug for LoadGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadGate")
      .field("state", &self.state())
      .finish()
  }
}

impl LoadGate {
  pub(crate) fn new() -> Self {
    let (state, _) = watch::channel(GateState::Idle);
    Self { state }
  }

  #[inline]
  pub(crate) fn state(&self) -> GateState {
    *self.state.borrow()
  }

  /// A receiver of every gate transition.
  pub(crate) fn subscribe(&self) -> watch::Receiver<GateState> {
    self.state.subscribe()
  }

  /// Suspends until no bulk load is running.
  pub(crate) async fn wait_idle(&self) {
    if self.state() == GateState::Idle {
      return;
    }
    let mut rx = self.state.subscribe();
    // The sender lives as long as `self`, so this cannot fail while we wait.
    let _ = rx.wait_for(|state| *state == GateState::Idle).await;
  }

  /// Waits for the gate to be idle and flips it to loading. The returned
  /// guard flips it back when dropped, whether the load succeeded, failed or
  /// was abandoned.
  pub(crate) async fn acquire(self: &Arc<Self>) -> LoadGuard {
    loop {
      self.wait_idle().await;
      let acquired = self.state.send_if_modified(|state| {
        if *state == GateState::Idle {
          *state = GateState::Loading;
          true
        } else {
          false
        }
      });
      if acquired {
        tracing::debug!("load gate acquired");
        return LoadGuard {
          gate: Arc::clone(self),
        };
      }
    }
  }
}

/// Holds the gate in the loading state until dropped.
#[must_use = "the gate is released as soon as the guard is dropped"]
pub(crate) struct LoadGuard {
  gate: Arc<LoadGate>,
}

impl fmt::Debug for LoadGuard {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadGuard").finish_non_exhaustive()
  }
}

impl Drop for LoadGuard {
  fn drop(&mut self) {
    self.gate.state.send_replace(GateState::Idle);
    tracing::debug!("load gate released");
  }
}
