use fibre_state::{Persistence, Source, StateBuilder};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Profile {
  id: u32,
  handle: String,
}

// A simulated slow profile service.
struct ProfileService {
  requests: Arc<AtomicUsize>,
}

impl Persistence<Profile, u32> for ProfileService {
  fn all(&self) -> Source<Vec<Profile>> {
    Source::value(Vec::new())
  }

  fn get(&self, ids: Vec<u32>) -> Source<Vec<Profile>> {
    let requests = self.requests.clone();
    Source::deferred_ok(async move {
      println!("--- Service: fetching {:?}. Simulating slow query...", ids);
      requests.fetch_add(1, Ordering::SeqCst);
      sleep(Duration::from_millis(500)).await;
      ids
        .into_iter()
        .map(|id| Profile {
          id,
          handle: format!("user_{}", id),
        })
        .collect()
    })
  }

  fn set(&self, items: Vec<Arc<Profile>>) -> Source<()> {
    println!("--- Service: storing {} profile(s)", items.len());
    Source::value(())
  }

  fn remove(&self, ids: Vec<u32>) -> Source<()> {
    println!("--- Service: deleting {:?}", ids);
    Source::value(())
  }
}

#[tokio::main]
async fn main() {
  let requests = Arc::new(AtomicUsize::new(0));

  let state = StateBuilder::<Profile, u32>::new("id")
    .persistence(ProfileService {
      requests: requests.clone(),
    })
    .build()
    .expect("Failed to build state");

  println!("--- Thundering Herd Demonstration ---");
  println!("Spawning 10 tasks that load profile 42 at once.\n");

  let mut tasks = Vec::new();
  for i in 0..10 {
    let state = state.clone();
    tasks.push(tokio::spawn(async move {
      let mut profile = state.load(Some(&42)).expect("identity encodes");
      let value = profile.next().await.expect("stream yields").expect("profile loads");
      println!("[Task {}] Received {}", i, value.handle);
    }));
  }
  for task in tasks {
    task.await.unwrap();
  }

  println!("\n--- Verification ---");
  println!(
    "The service was called {} time(s).",
    requests.load(Ordering::SeqCst)
  );
  assert_eq!(requests.load(Ordering::SeqCst), 1);
  println!("{}", state.metrics());
}
