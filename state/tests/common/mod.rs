#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibre_state::{ObservableState, Persistence, Source, StateBuilder, StateStream};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
}

pub fn user(id: u32, name: &str) -> User {
  User {
    id,
    name: Some(name.to_string()),
    email: None,
  }
}

pub fn builder() -> StateBuilder<User, u32> {
  StateBuilder::new("id")
}

pub fn build_test_state() -> ObservableState<User, u32> {
  builder().build().unwrap()
}

/// Drives a write stream to completion and returns the last value.
pub async fn put(state: &ObservableState<User, u32>, item: User) -> Arc<User> {
  let mut writes = state.set(Source::value(item)).unwrap();
  let mut last = None;
  while let Some(value) = writes.next().await {
    last = Some(value.unwrap());
  }
  last.unwrap()
}

/// The first value a stream yields.
pub async fn first<T>(mut stream: StateStream<T>) -> fibre_state::Result<T> {
  stream.next().await.expect("stream completed without a value")
}

#[derive(Debug, Default)]
struct Calls {
  all: AtomicUsize,
  get: AtomicUsize,
  set: AtomicUsize,
  remove: AtomicUsize,
  clear: AtomicUsize,
}

struct Inner {
  items: Mutex<Vec<User>>,
  calls: Calls,
  delay: Option<Duration>,
  supports_clear: bool,
}

/// An in-memory persistence layer that counts how often it is called.
#[derive(Clone)]
pub struct MemoryPersistence {
  inner: Arc<Inner>,
}

impl MemoryPersistence {
  pub fn new(items: Vec<User>) -> Self {
    Self::configured(items, None, true)
  }

  /// Every read takes `delay` to resolve.
  pub fn slow(items: Vec<User>, delay: Duration) -> Self {
    Self::configured(items, Some(delay), true)
  }

  pub fn without_clear(items: Vec<User>) -> Self {
    Self::configured(items, None, false)
  }

  fn configured(items: Vec<User>, delay: Option<Duration>, supports_clear: bool) -> Self {
    Self {
      inner: Arc::new(Inner {
        items: Mutex::new(items),
        calls: Calls::default(),
        delay,
        supports_clear,
      }),
    }
  }

  pub fn items(&self) -> Vec<User> {
    self.inner.items.lock().clone()
  }

  pub fn all_calls(&self) -> usize {
    self.inner.calls.all.load(Ordering::SeqCst)
  }

  pub fn get_calls(&self) -> usize {
    self.inner.calls.get.load(Ordering::SeqCst)
  }

  pub fn set_calls(&self) -> usize {
    self.inner.calls.set.load(Ordering::SeqCst)
  }

  pub fn remove_calls(&self) -> usize {
    self.inner.calls.remove.load(Ordering::SeqCst)
  }

  pub fn clear_calls(&self) -> usize {
    self.inner.calls.clear.load(Ordering::SeqCst)
  }

  fn read<F>(&self, select: F) -> Source<Vec<User>>
  where
    F: Fn(&User) -> bool + Send + 'static,
  {
    let inner = self.inner.clone();
    Source::deferred_ok(async move {
      if let Some(delay) = inner.delay {
        tokio::time::sleep(delay).await;
      }
      inner.items.lock().iter().filter(|item| select(item)).cloned().collect()
    })
  }
}

impl Persistence<User, u32> for MemoryPersistence {
  fn all(&self) -> Source<Vec<User>> {
    self.inner.calls.all.fetch_add(1, Ordering::SeqCst);
    self.read(|_| true)
  }

  fn get(&self, ids: Vec<u32>) -> Source<Vec<User>> {
    self.inner.calls.get.fetch_add(1, Ordering::SeqCst);
    self.read(move |item| ids.contains(&item.id))
  }

  fn set(&self, items: Vec<Arc<User>>) -> Source<()> {
    self.inner.calls.set.fetch_add(1, Ordering::SeqCst);
    let mut stored = self.inner.items.lock();
    for item in items {
      stored.retain(|existing| existing.id != item.id);
      stored.push(User::clone(&item));
    }
    Source::value(())
  }

  fn remove(&self, ids: Vec<u32>) -> Source<()> {
    self.inner.calls.remove.fetch_add(1, Ordering::SeqCst);
    self.inner.items.lock().retain(|existing| !ids.contains(&existing.id));
    Source::value(())
  }

  fn clear(&self) -> Option<Source<()>> {
    if !self.inner.supports_clear {
      return None;
    }
    self.inner.calls.clear.fetch_add(1, Ordering::SeqCst);
    self.inner.items.lock().clear();
    Some(Source::value(()))
  }
}
