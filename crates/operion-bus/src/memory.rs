use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::{BusError, Delivery, EventBus, Subscription};

/// All members of one consumer group for one topic, load-balanced
/// round-robin. Mirrors the "single reader/writer lock over shared mutable
/// state" policy laid out in §5 for the provider manager's running-providers
/// table.
struct GroupState {
  members: Vec<mpsc::UnboundedSender<Delivery>>,
  next: AtomicUsize,
}

impl GroupState {
  fn dispatch(&self, delivery: Delivery) {
    if self.members.is_empty() {
      return;
    }
    let start = self.next.fetch_add(1, Ordering::Relaxed) % self.members.len();
    // Try the round-robin pick first, then fall back to any live member —
    // a dropped receiver (unsubscribed consumer) must not silently swallow
    // the at-least-once guarantee for the rest of the group.
    for offset in 0..self.members.len() {
      let idx = (start + offset) % self.members.len();
      if self.members[idx].send(delivery.clone()).is_ok() {
        return;
      }
    }
  }
}

/// An in-memory [`EventBus`] used for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryBus {
  topics: RwLock<HashMap<String, HashMap<String, GroupState>>>,
}

impl InMemoryBus {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl EventBus for InMemoryBus {
  async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> Result<(), BusError> {
    let delivery = Delivery {
      topic: topic.to_string(),
      key: key.map(|k| k.to_string()),
      payload,
    };
    let topics = self.topics.read().await;
    if let Some(groups) = topics.get(topic) {
      for group in groups.values() {
        group.dispatch(delivery.clone());
      }
    }
    Ok(())
  }

  async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BusError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut topics = self.topics.write().await;
    let groups = topics.entry(topic.to_string()).or_default();
    groups
      .entry(group.to_string())
      .or_insert_with(|| GroupState {
        members: Vec::new(),
        next: AtomicUsize::new(0),
      })
      .members
      .push(tx);
    Ok(Box::new(InMemorySubscription { rx }))
  }
}

struct InMemorySubscription {
  rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
  async fn recv(&mut self) -> Option<Delivery> {
    self.rx.recv().await
  }
}

// Real "arc-shared bus" convenience, since every provider and subsystem
// holds a handle to the same bus instance across tasks.
pub type SharedBus = Arc<dyn EventBus>;

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn fan_out_across_groups() {
    let bus = InMemoryBus::new();
    let mut a = bus.subscribe("topic", "group-a").await.unwrap();
    let mut b = bus.subscribe("topic", "group-b").await.unwrap();

    bus.publish("topic", None, b"hello".to_vec()).await.unwrap();

    assert_eq!(a.recv().await.unwrap().payload, b"hello");
    assert_eq!(b.recv().await.unwrap().payload, b"hello");
  }

  #[tokio::test]
  async fn load_balances_within_a_group() {
    let bus = InMemoryBus::new();
    let mut m1 = bus.subscribe("topic", "group").await.unwrap();
    let mut m2 = bus.subscribe("topic", "group").await.unwrap();

    bus.publish("topic", None, b"one".to_vec()).await.unwrap();
    bus.publish("topic", None, b"two".to_vec()).await.unwrap();

    let first = m1.recv().await;
    let second = m2.recv().await;
    assert!(first.is_some());
    assert!(second.is_some());
  }

  #[tokio::test]
  async fn unsubscribed_topic_does_not_error() {
    let bus = InMemoryBus::new();
    assert!(bus.publish("no-subscribers", None, vec![]).await.is_ok());
  }
}
