use crate::encoding::EntryKey;
use crate::error::StateError;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;

/// How a read-through load of one key ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
  /// The loaded value was written into the table.
  Loaded,
  /// The load failed; followers report the same failure.
  Failed(StateError),
  /// The leading caller went away before the load finished. Followers should
  /// look at the table again and, on a miss, lead a new load themselves.
  Abandoned,
}

/// The internal state of a value being loaded.
enum State {
  Loading,
  Complete(LoadOutcome),
}

struct Inner {
  state: State,
  waiters: VecDeque<Waker>,
}

/// A load in flight for one key. Any number of tasks can await it.
pub(crate) struct LoadFuture {
  inner: Mutex<Inner>,
}

impl LoadFuture {
  /// Creates a new `LoadFuture` in the loading state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Loading,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Completes the future, waking every waiter. Only the first completion
  /// counts.
  pub(crate) fn complete(&self, outcome: LoadOutcome) {
    let mut inner = self.inner.lock();
    if matches!(inner.state, State::Complete(_)) {
      return;
    }
    inner.state = State::Complete(outcome);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }
}

impl Future for &LoadFuture {
  type Output = LoadOutcome;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(outcome) => Poll::Ready(outcome.clone()),
      State::Loading => {
        if !inner.waiters.iter().any(|w| w.will_wake(cx.waker())) {
          inner.waiters.push_back(cx.waker().clone());
        }
        Poll::Pending
      }
    }
  }
}

/// Either lead the load of a key or follow the one already running.
pub(crate) enum LoadRole {
  Leader(LeaderGuard),
  Follower(Arc<LoadFuture>),
}

/// The table of loads in flight, keyed like the entry table.
#[derive(Default)]
pub(crate) struct PendingLoads {
  loads: Arc<Mutex<HashMap<EntryKey, Arc<LoadFuture>>>>,
}

impl PendingLoads {
  pub(crate) fn new() -> Self {
    Self {
      loads: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Registers the caller as the leader for `key`, unless a load for it is
  /// already running.
  pub(crate) fn join(&self, key: &EntryKey) -> LoadRole {
    let mut loads = self.loads.lock();
    if let Some(existing) = loads.get(key) {
      return LoadRole::Follower(existing.clone());
    }
    let future = Arc::new(LoadFuture::new());
    loads.insert(key.clone(), future.clone());
    LoadRole::Leader(LeaderGuard {
      key: key.clone(),
      future,
      loads: self.loads.clone(),
      finished: false,
    })
  }

  pub(crate) fn len(&self) -> usize {
    self.loads.lock().len()
  }
}

/// Owned by the task performing a load. If it is dropped before
/// [`LeaderGuard::finish`] runs, followers are told the load was abandoned.
pub(crate) struct LeaderGuard {
  key: EntryKey,
  future: Arc<LoadFuture>,
  loads: Arc<Mutex<HashMap<EntryKey, Arc<LoadFuture>>>>,
  finished: bool,
}

impl LeaderGuard {
  pub(crate) fn finish(mut self, outcome: LoadOutcome) {
    self.finished = true;
    self.retire(outcome);
  }

  fn retire(&self, outcome: LoadOutcome) {
    // Unregister before completing so a woken follower that misses the
    // table can start a fresh load instead of re-joining this one.
    self.loads.lock().remove(&self.key);
    self.future.complete(outcome);
  }
}

impl Drop for LeaderGuard {
  fn drop(&mut self) {
    if !self.finished {
      self.retire(LoadOutcome::Abandoned);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::encoding::{Encoding, KeyEncoder};

  fn key(id: u32) -> EntryKey {
    KeyEncoder::new(Encoding::Plain, false)
      .encode(Some(&id))
      .unwrap()
  }

  #[tokio::test]
  async fn second_caller_follows_the_first() {
    let pending = PendingLoads::new();
    let leader = match pending.join(&key(1)) {
      LoadRole::Leader(guard) => guard,
      LoadRole::Follower(_) => panic!("first caller must lead"),
    };
    let follower = match pending.join(&key(1)) {
      LoadRole::Follower(future) => future,
      LoadRole::Leader(_) => panic!("second caller must follow"),
    };
    assert!(matches!(pending.join(&key(2)), LoadRole::Leader(_)));

    let waiter = tokio::spawn(async move { (&*follower).await });
    tokio::task::yield_now().await;
    leader.finish(LoadOutcome::Loaded);

    assert_eq!(waiter.await.unwrap(), LoadOutcome::Loaded);
    assert_eq!(pending.len(), 0);
  }

  #[tokio::test]
  async fn dropped_leader_abandons_the_load() {
    let pending = PendingLoads::new();
    let leader = pending.join(&key(1));
    let follower = match pending.join(&key(1)) {
      LoadRole::Follower(future) => future,
      LoadRole::Leader(_) => panic!("second caller must follow"),
    };

    drop(leader);
    assert_eq!((&*follower).await, LoadOutcome::Abandoned);
    assert!(matches!(pending.join(&key(1)), LoadRole::Leader(_)));
  }

  #[tokio::test]
  async fn failures_are_shared_with_followers() {
    let pending = PendingLoads::new();
    let leader = match pending.join(&key(1)) {
      LoadRole::Leader(guard) => guard,
      LoadRole::Follower(_) => panic!("first caller must lead"),
    };
    let follower = match pending.join(&key(1)) {
      LoadRole::Follower(future) => future,
      LoadRole::Leader(_) => panic!("second caller must follow"),
    };

    leader.finish(LoadOutcome::Failed(StateError::PersistenceUnavailable));
    assert_eq!(
      (&*follower).await,
      LoadOutcome::Failed(StateError::PersistenceUnavailable)
    );
  }
}
