//! Kafka-backed [`EventBus`], one acceptable realization of the transport
//! contract (§9). Preserves per-topic delivery, consumer-group fan-out,
//! at-least-once semantics and bounded per-partition ordering.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message as _;
use std::time::Duration;

use crate::{BusError, Delivery, EventBus, Subscription};

pub struct KafkaBus {
  producer: FutureProducer,
  brokers: String,
}

impl KafkaBus {
  pub fn new(brokers: impl Into<String>) -> Result<Self, BusError> {
    let brokers = brokers.into();
    let producer: FutureProducer = ClientConfig::new()
      .set("bootstrap.servers", &brokers)
      .set("message.timeout.ms", "5000")
      .create()
      .map_err(|e| BusError::Transport(e.to_string()))?;
    Ok(Self { producer, brokers })
  }
}

#[async_trait]
impl EventBus for KafkaBus {
  async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> Result<(), BusError> {
    let mut record = FutureRecord::to(topic).payload(&payload);
    if let Some(key) = key {
      record = record.key(key);
    }
    self
      .producer
      .send(record, Duration::from_secs(5))
      .await
      .map_err(|(e, _)| BusError::Transport(e.to_string()))?;
    Ok(())
  }

  async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BusError> {
    let consumer: StreamConsumer = ClientConfig::new()
      .set("bootstrap.servers", &self.brokers)
      .set("group.id", group)
      .set("enable.auto.commit", "true")
      .set("auto.offset.reset", "earliest")
      .create()
      .map_err(|e| BusError::Transport(e.to_string()))?;
    consumer
      .subscribe(&[topic])
      .map_err(|e| BusError::Transport(e.to_string()))?;
    Ok(Box::new(KafkaSubscription { consumer }))
  }
}

struct KafkaSubscription {
  consumer: StreamConsumer,
}

#[async_trait]
impl Subscription for KafkaSubscription {
  async fn recv(&mut self) -> Option<Delivery> {
    loop {
      match self.consumer.recv().await {
        Ok(message) => {
          let Some(payload) = message.payload() else {
            // Tombstone (null-payload) record: not a subscription close,
            // just nothing to deliver for this offset.
            continue;
          };
          let payload = payload.to_vec();
          let key = message.key().map(|k| String::from_utf8_lossy(k).into_owned());
          return Some(Delivery {
            topic: message.topic().to_string(),
            key,
            payload,
          });
        }
        Err(e) => {
          tracing::warn!(error = %e, "kafka consumer poll failed, retrying");
          continue;
        }
      }
    }
  }
}
