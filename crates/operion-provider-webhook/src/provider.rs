use std::sync::Arc;

use async_trait::async_trait;
use operion_provider::{EventCallback, Provider, ProviderDeps, TriggerConfig};
use operion_types::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::server::{shared, WebhookServer};

const PROVIDER_ID: &str = "webhook";

/// Per-binding provider shape: each configured trigger owns one path on the
/// shared listener for its configured port (§9 "Central versus per-binding").
pub struct WebhookProvider {
  server: Arc<WebhookServer>,
  shutdown: RwLock<Option<CancellationToken>>,
}

impl WebhookProvider {
  pub fn new(port: u16) -> Self {
    Self {
      server: shared(port),
      shutdown: RwLock::new(None),
    }
  }
}

#[async_trait]
impl Provider for WebhookProvider {
  fn id(&self) -> &str {
    PROVIDER_ID
  }

  async fn initialize(&self, deps: ProviderDeps) -> Result<(), Error> {
    *self.shutdown.write().await = Some(deps.cancellation.child_token());
    Ok(())
  }

  async fn prepare(&self) -> Result<(), Error> {
    Ok(())
  }

  async fn configure_trigger(&self, config: TriggerConfig) -> Result<String, Error> {
    let path = config
      .config
      .get("path")
      .and_then(|v| v.as_str())
      .ok_or_else(|| Error::Validation("webhook trigger missing path".to_string()))?
      .to_string();
    let source_id = format!("webhook-{}", config.trigger_id);
    self.server.register_path(&path, &source_id).await;
    Ok(source_id)
  }

  async fn remove_trigger(&self, _trigger_id: &str, source_id: &str) -> Result<(), Error> {
    self.server.remove_by_source_id(source_id).await;
    Ok(())
  }

  async fn start(&self, callback: EventCallback) -> Result<(), Error> {
    self.server.set_callback(callback).await;
    let shutdown = self
      .shutdown
      .read()
      .await
      .clone()
      .ok_or_else(|| Error::Fatal("webhook provider started before initialize".to_string()))?;
    self.server.ensure_listening(shutdown).await
  }

  async fn stop(&self) -> Result<(), Error> {
    if let Some(shutdown) = self.shutdown.read().await.clone() {
      shutdown.cancel();
    }
    Ok(())
  }

  async fn validate(&self) -> Result<(), Error> {
    Ok(())
  }
}
