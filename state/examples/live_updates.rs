use fibre_state::{Source, StateBuilder};
use futures_util::StreamExt;
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() {
  let state = StateBuilder::<serde_json::Value, String>::new("sku")
    .time_to_live(Duration::from_secs(30))
    .build()
    .expect("Failed to build state");

  state
    .set(Source::value(json!({ "sku": "A-1", "stock": 10, "price": 250 })))
    .expect("item has an identity")
    .next()
    .await;

  // Follow the item. The first value is the current one.
  let mut watcher = state
    .get(Some(&"A-1".to_string()), None)
    .expect("identity encodes");
  let reader = tokio::spawn(async move {
    while let Some(item) = watcher.next().await {
      match item {
        Ok(item) => println!("[Watcher] {}", item),
        Err(e) => println!("[Watcher] error: {}", e),
      }
    }
    println!("[Watcher] entry removed; stream ended");
  });

  for stock in [8, 5, 1] {
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Only the stock changes; the price is kept.
    state
      .merge(Source::value(json!({ "sku": "A-1", "stock": stock })))
      .expect("item has an identity")
      .next()
      .await;
  }

  tokio::time::sleep(Duration::from_millis(100)).await;
  state.remove(Some(&"A-1".to_string())).unwrap();
  reader.await.unwrap();
}
