use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use operion_types::Error;
use tokio_util::sync::CancellationToken;

/// One trigger binding request routed to a provider (§4.1 event routing).
#[derive(Debug, Clone)]
pub struct TriggerConfig {
  pub trigger_id: String,
  pub workflow_id: String,
  pub node_type: String,
  pub config: HashMap<String, serde_json::Value>,
  pub provider_id: String,
}

impl TriggerConfig {
  pub fn validate(&self) -> Result<(), Error> {
    if self.trigger_id.is_empty() {
      return Err(Error::Validation("trigger config missing trigger_id".into()));
    }
    if self.workflow_id.is_empty() {
      return Err(Error::Validation("trigger config missing workflow_id".into()));
    }
    if self.node_type.is_empty() {
      return Err(Error::Validation("trigger config missing node_type".into()));
    }
    if self.provider_id.is_empty() {
      return Err(Error::Validation("trigger config missing provider_id".into()));
    }
    Ok(())
  }
}

/// Dependencies handed to a provider at `Initialize`. Deliberately excludes
/// any shared persistence handle (§9 "Provider isolation") — a provider
/// manages its own stores.
#[derive(Clone)]
pub struct ProviderDeps {
  pub cancellation: CancellationToken,
}

/// Invoked by a running provider for each event it observes. Publish
/// failures are returned so the provider can decide whether to retry.
pub type EventCallback = Arc<
  dyn Fn(
      String,
      String,
      String,
      serde_json::Value,
    ) -> futures::future::BoxFuture<'static, Result<(), Error>>
    + Send
    + Sync,
>;

/// The contract every source provider implements (§4.1).
///
/// Two shapes fit this contract: *centralized* (one instance covers every
/// binding of a kind, e.g. the scheduler) and *per-binding* (one instance
/// per external subscription, e.g. a kafka consumer-per-topic). The
/// contract itself does not distinguish them.
#[async_trait]
pub trait Provider: Send + Sync {
  /// The `provider_id` this instance answers to, e.g. `"scheduler"`.
  fn id(&self) -> &str;

  /// One-shot setup. Must be idempotent.
  async fn initialize(&self, deps: ProviderDeps) -> Result<(), Error>;

  /// Final pre-`start` step (e.g. open connections).
  async fn prepare(&self) -> Result<(), Error>;

  /// Register one trigger; returns a stable `source_id`. Re-invoking with
  /// the same `trigger_id` updates the binding and may return the same id.
  async fn configure_trigger(&self, config: TriggerConfig) -> Result<String, Error>;

  /// Unbind. Idempotent; succeeds if the binding is already absent.
  async fn remove_trigger(&self, trigger_id: &str, source_id: &str) -> Result<(), Error>;

  /// Begin emitting events through `callback`. Suspensions and I/O happen
  /// inside the provider.
  async fn start(&self, callback: EventCallback) -> Result<(), Error>;

  /// Graceful shutdown with in-flight drain.
  async fn stop(&self) -> Result<(), Error>;

  /// Static configuration check.
  async fn validate(&self) -> Result<(), Error>;
}
