mod common;

use common::{builder, first, put, user, MemoryPersistence};
use fibre_state::{Source, StateError};
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_load_reads_through_on_a_miss() {
  let persistence = MemoryPersistence::new(vec![user(1, "ada"), user(2, "grace")]);
  let state = builder().persistence(persistence.clone()).build().unwrap();

  let loaded = first(state.load(Some(&2)).unwrap()).await.unwrap();
  assert_eq!(loaded.name.as_deref(), Some("grace"));
  assert!(state.exists(Some(&2)).unwrap());

  // Now a hit; persistence is not asked again.
  first(state.load(Some(&2)).unwrap()).await.unwrap();
  assert_eq!(persistence.get_calls(), 1);
  assert_eq!(state.metrics().persistence_loads, 1);
  // Loaded items are not echoed back.
  assert_eq!(persistence.set_calls(), 0);
}

#[tokio::test]
async fn test_load_of_unknown_identity_is_not_found() {
  let persistence = MemoryPersistence::new(vec![user(1, "ada")]);
  let state = builder().persistence(persistence).build().unwrap();

  let result = first(state.load(Some(&9)).unwrap()).await;
  assert_eq!(result, Err(StateError::ItemNotFound("9".into())));
  assert_eq!(state.count(), 0);
}

#[tokio::test]
async fn test_load_without_persistence_is_unavailable() {
  let state = builder().build().unwrap();
  let result = first(state.load(Some(&1)).unwrap()).await;
  assert_eq!(result, Err(StateError::PersistenceUnavailable));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_loads_share_one_fetch() {
  let persistence = MemoryPersistence::slow(vec![user(1, "ada")], Duration::from_millis(50));
  let state = builder().persistence(persistence.clone()).build().unwrap();

  let (a, b, c) = tokio::join!(
    first(state.load(Some(&1)).unwrap()),
    first(state.load(Some(&1)).unwrap()),
    first(state.load(Some(&1)).unwrap())
  );
  assert_eq!(a.unwrap().id, 1);
  assert_eq!(b.unwrap().id, 1);
  assert_eq!(c.unwrap().id, 1);
  assert_eq!(persistence.get_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_load_is_taken_over() {
  let persistence = MemoryPersistence::slow(vec![user(1, "ada")], Duration::from_millis(50));
  let state = builder().persistence(persistence.clone()).build().unwrap();

  let mut leader = state.load(Some(&1)).unwrap();
  let follower = tokio::spawn(first(state.load(Some(&1)).unwrap()));

  // Start the leader's fetch, let the follower queue behind it, then give up.
  let timed_out = tokio::time::timeout(Duration::from_millis(10), leader.next()).await;
  assert!(timed_out.is_err());
  drop(leader);

  let loaded = follower.await.unwrap().unwrap();
  assert_eq!(loaded.name.as_deref(), Some("ada"));
  assert_eq!(persistence.get_calls(), 2);
}

#[tokio::test]
async fn test_get_reads_through_only_when_enabled() {
  let persistence = MemoryPersistence::new(vec![user(1, "ada")]);

  let plain = builder().persistence(persistence.clone()).build().unwrap();
  let result = first(plain.get(Some(&1), None).unwrap()).await;
  assert_eq!(result, Err(StateError::ItemNotFound("1".into())));
  assert_eq!(persistence.get_calls(), 0);

  let reading = builder()
    .persistence(persistence.clone())
    .read_through(true)
    .build()
    .unwrap();
  let loaded = first(reading.get(Some(&1), None).unwrap()).await.unwrap();
  assert_eq!(loaded.name.as_deref(), Some("ada"));
  assert_eq!(persistence.get_calls(), 1);
}

#[tokio::test]
async fn test_load_multiple_fetches_misses_in_one_call() {
  let persistence = MemoryPersistence::new(vec![user(2, "grace"), user(3, "hopper")]);
  let state = builder().persistence(persistence.clone()).build().unwrap();
  put(&state, user(1, "ada")).await;

  let values = state.load_multiple(&[3, 1, 2], true).unwrap().await.unwrap();
  let ids: Vec<u32> = values.iter().map(|u| u.id).collect();
  assert_eq!(ids, vec![3, 1, 2]);
  assert_eq!(persistence.get_calls(), 1);

  // Everything is resident now.
  state.load_multiple(&[1, 2, 3], true).unwrap().await.unwrap();
  assert_eq!(persistence.get_calls(), 1);
}

#[tokio::test]
async fn test_load_multiple_missing_ids() {
  let persistence = MemoryPersistence::new(vec![user(1, "ada")]);
  let state = builder().persistence(persistence).build().unwrap();

  let strict = state.load_multiple(&[1, 4], true).unwrap().await;
  assert_eq!(strict, Err(StateError::ItemNotFound("4".into())));

  let lenient = state.load_multiple(&[4, 1], false).unwrap().await.unwrap();
  assert_eq!(lenient.len(), 1);
  assert_eq!(lenient[0].id, 1);

  let empty = state.load_multiple(&[], true).unwrap().await;
  assert_eq!(empty, Ok(Vec::new()));
}

#[tokio::test]
async fn test_load_all_populates_the_table() {
  let persistence = MemoryPersistence::new(vec![user(1, "ada"), user(2, "grace")]);
  let state = builder()
    .persistence(persistence.clone())
    .write_through(false)
    .build()
    .unwrap();
  put(&state, user(9, "local only")).await;

  let loaded = state.load_all().await.unwrap();
  assert_eq!(loaded.len(), 2);
  assert_eq!(state.get_all_ids().await.unwrap(), vec![9, 1, 2]);
  assert_eq!(persistence.all_calls(), 1);
}

#[tokio::test]
async fn test_load_all_without_persistence_fails_and_releases_the_gate() {
  let state = builder().build().unwrap();
  assert_eq!(state.load_all().await, Err(StateError::PersistenceUnavailable));
  assert_eq!(state.gate_state(), fibre_state::GateState::Idle);
}

#[tokio::test]
async fn test_writes_are_relayed() {
  let persistence = MemoryPersistence::new(Vec::new());
  let state = builder().persistence(persistence.clone()).build().unwrap();

  put(&state, user(1, "ada")).await;
  first(state.set_multiple(Source::value(vec![user(2, "grace")]), true, false).unwrap())
    .await
    .unwrap();
  let ids: Vec<u32> = persistence.items().iter().map(|u| u.id).collect();
  assert_eq!(ids, vec![1, 2]);
  assert_eq!(persistence.set_calls(), 2);

  state.remove(Some(&1)).unwrap();
  assert_eq!(persistence.remove_calls(), 1);
  assert_eq!(persistence.items().len(), 1);

  state.clear();
  assert_eq!(persistence.clear_calls(), 1);
  assert!(persistence.items().is_empty());
}

#[tokio::test]
async fn test_remove_of_an_uncached_identity_reaches_persistence() {
  let persistence = MemoryPersistence::new(vec![user(5, "ghost")]);
  let state = builder().persistence(persistence.clone()).build().unwrap();

  assert!(!state.remove(Some(&5)).unwrap());
  assert_eq!(persistence.remove_calls(), 1);
  assert!(persistence.items().is_empty());

  let result = first(state.load(Some(&5)).unwrap()).await;
  assert_eq!(result, Err(StateError::ItemNotFound("5".into())));
}

#[tokio::test]
async fn test_relays_can_be_disabled() {
  let persistence = MemoryPersistence::new(Vec::new());
  let state = builder()
    .persistence(persistence.clone())
    .write_through(false)
    .build()
    .unwrap();

  put(&state, user(1, "ada")).await;
  state.remove(Some(&1)).unwrap();
  state.clear();
  assert_eq!(persistence.set_calls(), 0);
  assert_eq!(persistence.remove_calls(), 0);
  assert_eq!(persistence.clear_calls(), 0);
}

#[tokio::test]
async fn test_clear_is_local_when_persistence_cannot_clear() {
  let persistence = MemoryPersistence::without_clear(vec![user(1, "ada")]);
  let state = builder().persistence(persistence.clone()).build().unwrap();
  state.load_all().await.unwrap();

  state.clear();
  assert_eq!(state.count(), 0);
  assert_eq!(persistence.items().len(), 1);
}

#[test]
fn test_relays_need_a_spawner_outside_a_runtime() {
  let result = builder()
    .persistence(MemoryPersistence::new(Vec::new()))
    .build();
  assert!(matches!(result, Err(fibre_state::BuildError::SpawnerRequired)));

  // Without relays there is nothing to spawn.
  let result = builder()
    .persistence(MemoryPersistence::new(Vec::new()))
    .write_through(false)
    .build();
  assert!(result.is_ok());
}
