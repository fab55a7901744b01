mod common;

use common::{builder, put, user, User};
use fibre_state::{ChangeListener, StateChange, StateOperation};
use pretty_assertions::assert_eq;
use std::time::Duration;
// A channel that can be sent to from the notifier thread and received on an async task.
use tokio::sync::mpsc;

struct TestListener {
  sender: mpsc::Sender<(StateOperation, Option<String>, Option<String>)>,
}

impl ChangeListener<User> for TestListener {
  fn on_change(&self, change: StateChange<User>) {
    let key = change.key.map(|key| key.into_string());
    let name = change.entry.data.and_then(|user| user.name.clone());
    self.sender.blocking_send((change.operation, key, name)).unwrap();
  }
}

#[tokio::test]
async fn test_listener_observes_writes_and_removals() {
  let (tx, mut rx) = mpsc::channel(16);
  let state = builder()
    .change_listener(TestListener { sender: tx })
    .build()
    .unwrap();

  put(&state, user(1, "ada")).await;
  put(&state, user(1, "lovelace")).await;
  state.remove(Some(&1)).unwrap();
  state.clear();

  assert_eq!(
    rx.recv().await.unwrap(),
    (StateOperation::Set, Some("1".to_string()), Some("ada".to_string()))
  );
  assert_eq!(
    rx.recv().await.unwrap(),
    (StateOperation::Set, Some("1".to_string()), Some("lovelace".to_string()))
  );
  assert_eq!(
    rx.recv().await.unwrap(),
    (StateOperation::Remove, Some("1".to_string()), None)
  );
  assert_eq!(rx.recv().await.unwrap(), (StateOperation::Clear, None, None));
}

#[tokio::test(start_paused = true)]
async fn test_listener_sees_ttl_evictions_as_removals() {
  let (tx, mut rx) = mpsc::channel(16);
  let state = builder()
    .time_to_live(Duration::from_secs(5))
    .change_listener(TestListener { sender: tx })
    .build()
    .unwrap();

  put(&state, user(7, "brief")).await;
  tokio::time::advance(Duration::from_secs(5)).await;
  assert!(!state.exists(Some(&7)).unwrap());

  assert_eq!(rx.recv().await.unwrap().0, StateOperation::Set);
  assert_eq!(
    rx.recv().await.unwrap(),
    (StateOperation::Remove, Some("7".to_string()), None)
  );
}
