use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use operion_bus::EventBus;
use operion_provider::{EventCallback, Provider, ProviderDeps, TriggerConfig};
use operion_types::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const PROVIDER_ID: &str = "queue";

#[derive(Debug, Clone)]
struct Binding {
  topic: String,
  group: String,
}

struct RunningConsumer {
  shutdown: CancellationToken,
}

/// Per-binding provider shape built directly on the transport-agnostic
/// [`EventBus`], contrasted with [`operion_provider_kafka`]'s raw `rdkafka`
/// consumer and with the scheduler's single centralized poll loop (§9).
pub struct QueueProvider {
  bus: Arc<dyn EventBus>,
  cancellation: RwLock<Option<CancellationToken>>,
  callback: RwLock<Option<EventCallback>>,
  bindings: RwLock<HashMap<String, Binding>>,
  running: RwLock<HashMap<String, RunningConsumer>>,
}

impl QueueProvider {
  pub fn new(bus: Arc<dyn EventBus>) -> Self {
    Self {
      bus,
      cancellation: RwLock::new(None),
      callback: RwLock::new(None),
      bindings: RwLock::new(HashMap::new()),
      running: RwLock::new(HashMap::new()),
    }
  }

  async fn spawn_consumer(&self, source_id: &str, binding: &Binding, callback: EventCallback) -> Result<(), Error> {
    let mut subscription = self
      .bus
      .subscribe(&binding.topic, &binding.group)
      .await
      .map_err(|e| Error::TransientTransport(format!("queue subscribe: {e}")))?;

    let parent = self
      .cancellation
      .read()
      .await
      .clone()
      .ok_or_else(|| Error::Fatal("queue provider started before initialize".to_string()))?;
    let shutdown = parent.child_token();
    let task_shutdown = shutdown.clone();
    let source_id = source_id.to_string();
    let topic = binding.topic.clone();

    tokio::spawn(async move {
      tracing::info!(source_id, topic, "queue consumer started");
      loop {
        tokio::select! {
          _ = task_shutdown.cancelled() => break,
          delivery = subscription.recv() => {
            let Some(delivery) = delivery else { break };
            let event_data: serde_json::Value = serde_json::from_slice(&delivery.payload)
              .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&delivery.payload).into_owned()));
            let result = callback(
              source_id.clone(),
              PROVIDER_ID.to_string(),
              "QueueMessage".to_string(),
              event_data,
            )
            .await;
            if let Err(error) = result {
              tracing::warn!(%error, source_id, "queue: dispatch to callback failed");
            }
          }
        }
      }
      tracing::info!(source_id, "queue consumer stopped");
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
impl Provider for QueueProvider {
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
      .ok_or_else(|| Error::Validation("queue trigger missing topic".to_string()))?
      .to_string();
    let group = config
      .config
      .get("group")
      .and_then(|v| v.as_str())
      .map(str::to_string)
      .unwrap_or_else(|| format!("operion-{}", config.trigger_id));
    let source_id = format!("queue-{}", config.trigger_id);

    let binding = Binding { topic, group };
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
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use operion_bus::InMemoryBus;
  use operion_types::Error as OpError;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio_util::sync::CancellationToken;

  #[tokio::test]
  async fn delivers_published_messages_to_callback() {
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let provider = QueueProvider::new(bus.clone());
    provider
      .initialize(ProviderDeps {
        cancellation: CancellationToken::new(),
      })
      .await
      .unwrap();

    let config = TriggerConfig {
      trigger_id: "t1".into(),
      workflow_id: "w1".into(),
      node_type: "trigger:queue".into(),
      config: HashMap::from([(
        "topic".to_string(),
        serde_json::Value::String("orders".to_string()),
      )]),
      provider_id: "queue".into(),
    };
    let source_id = provider.configure_trigger(config).await.unwrap();
    assert_eq!(source_id, "queue-t1");

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    let callback: EventCallback = Arc::new(move |_source_id, _provider_id, _event_type, _data| {
      let received = received_clone.clone();
      Box::pin(async move {
        received.fetch_add(1, Ordering::SeqCst);
        Ok::<(), OpError>(())
      })
    });
    provider.start(callback).await.unwrap();

    bus
      .publish("orders", None, serde_json::to_vec(&serde_json::json!({"id": 1})).unwrap())
      .await
      .unwrap();

    for _ in 0..50 {
      if received.load(Ordering::SeqCst) > 0 {
        break;
      }
      tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(received.load(Ordering::SeqCst), 1);
    provider.stop().await.unwrap();
  }
}
