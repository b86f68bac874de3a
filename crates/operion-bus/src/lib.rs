//! Event bus abstraction.
//!
//! The core never depends on a specific transport: the source-event bus and
//! the workflow bus are both just topics behind [`EventBus`]. An in-memory
//! implementation backs unit/integration tests; [`kafka`] provides one
//! acceptable production realization (§9 "event-bus transport"), built
//! behind the `kafka` feature so the default build has no native
//! dependency on `librdkafka`.
//!
//! Delivery is at-least-once with consumer-group fan-out: within one group,
//! each message goes to exactly one member; across groups, every group sees
//! every message. Handlers must be idempotent (§6.1).

mod error;
mod memory;
pub mod topics;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use error::BusError;
pub use memory::InMemoryBus;

use async_trait::async_trait;

/// A message delivered off the bus.
#[derive(Debug, Clone)]
pub struct Delivery {
  pub topic: String,
  pub key: Option<String>,
  pub payload: Vec<u8>,
}

/// A transport-agnostic publish/subscribe bus.
#[async_trait]
pub trait EventBus: Send + Sync {
  /// Publish `payload` to `topic`. `key` determines ordering scope where the
  /// transport supports partitioning (e.g. kafka partitions by key).
  async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> Result<(), BusError>;

  /// Subscribe to `topic` as a member of consumer `group`. Messages within a
  /// group are load-balanced across members; every group receives every
  /// message independently.
  async fn subscribe(
    &self,
    topic: &str,
    group: &str,
  ) -> Result<Box<dyn Subscription>, BusError>;
}

/// A handle to a live subscription.
#[async_trait]
pub trait Subscription: Send {
  /// Receive the next delivery. Returns `None` once the bus has shut down.
  async fn recv(&mut self) -> Option<Delivery>;
}

/// Convenience: publish a serde-serializable value as JSON.
pub async fn publish_json<T: serde::Serialize + Sync>(
  bus: &dyn EventBus,
  topic: &str,
  key: Option<&str>,
  value: &T,
) -> Result<(), BusError> {
  let payload = serde_json::to_vec(value).map_err(|e| BusError::Codec(e.to_string()))?;
  bus.publish(topic, key, payload).await
}
