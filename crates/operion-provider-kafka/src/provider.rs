use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use operion_provider::{EventCallback, Provider, ProviderDeps, TriggerConfig};
use operion_types::Error;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message as _;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const PROVIDER_ID: &str = "kafka";

#[derive(Debug, Clone)]
struct Binding {
  topic: String,
  group_id: String,
}

struct RunningConsumer {
  shutdown: CancellationToken,
}

/// Per-binding provider shape (§9 "Central versus per-binding"): every
/// configured trigger owns its own consumer task and consumer group,
/// contrasting with the scheduler's single centralized poll loop.
pub struct KafkaProvider {
  brokers: String,
  cancellation: RwLock<Option<CancellationToken>>,
  callback: RwLock<Option<EventCallback>>,
  bindings: RwLock<HashMap<String, Binding>>,
  running: RwLock<HashMap<String, RunningConsumer>>,
}

impl KafkaProvider {
  pub fn new(brokers: impl Into<String>) -> Self {
    Self {
      brokers: brokers.into(),
      cancellation: RwLock::new(None),
      callback: RwLock::new(None),
      bindings: RwLock::new(HashMap::new()),
      running: RwLock::new(HashMap::new()),
    }
  }

  async fn spawn_consumer(&self, source_id: &str, binding: &Binding, callback: EventCallback) -> Result<(), Error> {
    let consumer: StreamConsumer = ClientConfig::new()
      .set("bootstrap.servers", &self.brokers)
      .set("group.id", &binding.group_id)
      .set("enable.auto.commit", "true")
      .set("auto.offset.reset", "earliest")
      .create()
      .map_err(|e| Error::TransientTransport(format!("kafka consumer config: {e}")))?;
    consumer
      .subscribe(&[binding.topic.as_str()])
      .map_err(|e| Error::TransientTransport(format!("kafka subscribe: {e}")))?;

    let parent = self
      .cancellation
      .read()
      .await
      .clone()
      .ok_or_else(|| Error::Fatal("kafka provider started before initialize".to_string()))?;
    let shutdown = parent.child_token();
    let task_shutdown = shutdown.clone();
    let source_id = source_id.to_string();
    let topic = binding.topic.clone();

    tokio::spawn(async move {
      tracing::info!(source_id, topic, "kafka consumer started");
      loop {
        tokio::select! {
          _ = task_shutdown.cancelled() => break,
          message = consumer.recv() => {
            match message {
              Ok(message) => {
                let Some(payload) = message.payload() else { continue };
                let event_data: serde_json::Value = serde_json::from_slice(payload)
                  .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into_owned()));
                let result = callback(
                  source_id.clone(),
                  PROVIDER_ID.to_string(),
                  "KafkaMessage".to_string(),
                  event_data,
                )
                .await;
                if let Err(error) = result {
                  tracing::warn!(%error, source_id, "kafka: dispatch to callback failed");
                }
              }
              Err(error) => {
                tracing::warn!(%error, topic, "kafka consumer poll failed, retrying");
              }
            }
          }
        }
      }
      tracing::info!(source_id, "kafka consumer stopped");
    });

    self
      .running
      .write()
      .await
      .insert(source_id.to_string(), RunningConsumer { shutdown });
    Ok(())
  }
}

#[async_trait]
impl Provider for KafkaProvider {
  fn id(&self) -> &str {
    PROVIDER_ID
  }

  async fn initialize(&self, deps: ProviderDeps) -> Result<(), Error> {
    *self.cancellation.write().await = Some(deps.cancellation.child_token());
    Ok(())
  }

  async fn prepare(&self) -> Result<(), Error> {
    Ok(())
  }

  async fn configure_trigger(&self, config: TriggerConfig) -> Result<String, Error> {
    let topic = config
      .config
      .get("topic")
      .and_then(|v| v.as_str())
      .ok_or_else(|| Error::Validation("kafka trigger missing topic".to_string()))?
      .to_string();
    let group_id = config
      .config
      .get("group_id")
      .and_then(|v| v.as_str())
      .map(str::to_string)
      .unwrap_or_else(|| format!("operion-{}", config.trigger_id));
    let source_id = format!("kafka-{}", config.trigger_id);

    let binding = Binding { topic, group_id };
    self
      .bindings
      .write()
      .await
      .insert(source_id.clone(), binding.clone());

    if let Some(callback) = self.callback.read().await.clone() {
      if let Some(running) = self.running.write().await.remove(&source_id) {
        running.shutdown.cancel();
      }
      self.spawn_consumer(&source_id, &binding, callback).await?;
    }

    Ok(source_id)
  }

  async fn remove_trigger(&self, _trigger_id: &str, source_id: &str) -> Result<(), Error> {
    self.bindings.write().await.remove(source_id);
    if let Some(running) = self.running.write().await.remove(source_id) {
      running.shutdown.cancel();
    }
    Ok(())
  }

  async fn start(&self, callback: EventCallback) -> Result<(), Error> {
    *self.callback.write().await = Some(callback.clone());
    let bindings: Vec<(String, Binding)> = self
      .bindings
      .read()
      .await
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    for (source_id, binding) in bindings {
      if !self.running.read().await.contains_key(&source_id) {
        self.spawn_consumer(&source_id, &binding, callback.clone()).await?;
      }
    }
    Ok(())
  }

  async fn stop(&self) -> Result<(), Error> {
    for (_, running) in self.running.write().await.drain() {
      running.shutdown.cancel();
    }
    Ok(())
  }

  async fn validate(&self) -> Result<(), Error> {
    if self.brokers.is_empty() {
      return Err(Error::Validation("kafka provider missing brokers".to_string()));
    }
    Ok(())
  }
}
