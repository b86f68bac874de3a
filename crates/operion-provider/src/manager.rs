use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use operion_bus::{topics, publish_json, EventBus};
use operion_repository::{ListOptions, NodeRepository, WorkflowRepository};
use operion_types::{DomainEvent, Error, PublishedTriggerNode, SourceEvent, WorkflowNode, WorkflowStatus};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::provider::{EventCallback, Provider, ProviderDeps, TriggerConfig};

/// Splits `trigger:scheduler` into `scheduler`; falls back to the full
/// string if there is no `:` (§4.1 "Event routing").
pub fn derive_provider_id(node_type: &str) -> &str {
  node_type.split_once(':').map(|(_, rest)| rest).unwrap_or(node_type)
}

/// Owns the lifecycle of every configured source provider.
pub struct ProviderManager {
  providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
  bus: Arc<dyn EventBus>,
  node_repo: Arc<dyn NodeRepository>,
  workflow_repo: Arc<dyn WorkflowRepository>,
  cancellation: CancellationToken,
  restart_backoff: Duration,
  restart_max_attempts: u32,
}

/// Outcome of applying a batch of per-trigger operations (§7 "Propagation").
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchCounts {
  pub success: usize,
  pub error: usize,
}

impl ProviderManager {
  pub fn new(
    bus: Arc<dyn EventBus>,
    node_repo: Arc<dyn NodeRepository>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    restart_backoff: Duration,
    restart_max_attempts: u32,
  ) -> Self {
    Self {
      providers: RwLock::new(HashMap::new()),
      bus,
      node_repo,
      workflow_repo,
      cancellation: CancellationToken::new(),
      restart_backoff,
      restart_max_attempts,
    }
  }

  pub fn cancellation(&self) -> CancellationToken {
    self.cancellation.clone()
  }

  /// Register a provider without starting it.
  pub async fn register(&self, provider: Arc<dyn Provider>) {
    let id = provider.id().to_string();
    self.providers.write().await.insert(id, provider);
  }

  async fn running(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
    self.providers.read().await.get(provider_id).cloned()
  }

  /// Initialize, prepare, validate and start every registered provider.
  /// Returns immediately; each provider's `start` runs on its own task.
  pub async fn start_all(&self) -> Result<(), Error> {
    let providers: Vec<Arc<dyn Provider>> = self.providers.read().await.values().cloned().collect();
    for provider in providers {
      let deps = ProviderDeps {
        cancellation: self.cancellation.clone(),
      };
      provider.initialize(deps).await?;
      provider.prepare().await?;
      provider.validate().await?;

      let callback = self.forwarding_callback();
      let provider_for_task = provider.clone();
      tokio::spawn(async move {
        if let Err(error) = provider_for_task.start(callback).await {
          tracing::error!(provider = provider_for_task.id(), %error, "provider start failed");
        }
      });
    }
    Ok(())
  }

  /// The callback passed to every provider's `start`: builds, validates and
  /// publishes a [`SourceEvent`] (§4.1 "Forwarding").
  fn forwarding_callback(&self) -> EventCallback {
    let bus = self.bus.clone();
    Arc::new(move |source_id, provider_id, event_type, event_data| {
      let bus = bus.clone();
      Box::pin(async move {
        let event = SourceEvent {
          source_id,
          provider_id,
          event_type,
          event_data,
          occurred_at: chrono::Utc::now(),
        };
        event.validate()?;
        publish_json(bus.as_ref(), topics::SOURCE_EVENTS, Some(&event.source_id), &event)
          .await
          .map_err(|e| Error::TransientTransport(e.to_string()))
      })
    })
  }

  /// Apply one domain event (§4.1 "Event routing"). Per-item failures
  /// within a batch (publish/unpublish trigger lists) never abort the
  /// batch — they are logged and counted.
  pub async fn apply_domain_event(&self, event: DomainEvent) -> BatchCounts {
    match event {
      DomainEvent::TriggerCreated {
        trigger_id,
        workflow_id,
        node_type,
        config,
        ..
      }
      | DomainEvent::TriggerUpdated {
        trigger_id,
        workflow_id,
        node_type,
        config,
        ..
      } => {
        let mut counts = BatchCounts::default();
        self
          .configure_one(&workflow_id, &trigger_id, &node_type, config, &mut counts)
          .await;
        counts
      }
      DomainEvent::TriggerDeleted {
        trigger_id,
        node_type,
        source_id,
        ..
      } => {
        let mut counts = BatchCounts::default();
        if let Some(source_id) = source_id.filter(|s| !s.is_empty()) {
          self.remove_one(&node_type, &trigger_id, &source_id, &mut counts).await;
        }
        counts
      }
      DomainEvent::WorkflowPublished {
        workflow_id,
        trigger_nodes,
        ..
      } => {
        let mut counts = BatchCounts::default();
        for node in trigger_nodes {
          self
            .configure_one(&workflow_id, &node.id, &node.node_type, node.config, &mut counts)
            .await;
        }
        counts
      }
      DomainEvent::WorkflowUnpublished { trigger_nodes, .. } => {
        let mut counts = BatchCounts::default();
        for node in trigger_nodes {
          if let Some(source_id) = node.source_id.filter(|s| !s.is_empty()) {
            self
              .remove_one(&node.node_type, &node.id, &source_id, &mut counts)
              .await;
          }
        }
        counts
      }
    }
  }

  async fn configure_one(
    &self,
    workflow_id: &str,
    trigger_id: &str,
    node_type: &str,
    config: HashMap<String, serde_json::Value>,
    counts: &mut BatchCounts,
  ) {
    let provider_id = derive_provider_id(node_type).to_string();
    let Some(provider) = self.running(&provider_id).await else {
      tracing::info!(provider_id, trigger_id, "provider not running, skipping trigger");
      counts.error += 1;
      return;
    };

    let trigger_config = TriggerConfig {
      trigger_id: trigger_id.to_string(),
      workflow_id: workflow_id.to_string(),
      node_type: node_type.to_string(),
      config,
      provider_id: provider_id.clone(),
    };
    if let Err(error) = trigger_config.validate() {
      tracing::warn!(trigger_id, %error, "invalid trigger config");
      counts.error += 1;
      return;
    }

    match provider.configure_trigger(trigger_config).await {
      Ok(source_id) => {
        if let Err(error) = self.persist_source_id(workflow_id, trigger_id, &source_id).await {
          tracing::error!(trigger_id, %error, "failed to persist source_id");
          counts.error += 1;
        } else {
          counts.success += 1;
        }
      }
      Err(error) => {
        tracing::warn!(trigger_id, %error, "configure_trigger failed");
        counts.error += 1;
      }
    }
  }

  async fn remove_one(&self, node_type: &str, trigger_id: &str, source_id: &str, counts: &mut BatchCounts) {
    let provider_id = derive_provider_id(node_type);
    let Some(provider) = self.running(provider_id).await else {
      tracing::info!(provider_id, trigger_id, "provider not running, skipping removal");
      counts.error += 1;
      return;
    };
    match provider.remove_trigger(trigger_id, source_id).await {
      Ok(()) => counts.success += 1,
      Err(error) => {
        tracing::warn!(trigger_id, %error, "remove_trigger failed");
        counts.error += 1;
      }
    }
  }

  async fn persist_source_id(&self, workflow_id: &str, trigger_id: &str, source_id: &str) -> Result<(), Error> {
    let nodes = self.node_repo.get_nodes_from_published(workflow_id).await?;
    let Some(mut node) = nodes.into_iter().find(|n| n.id == trigger_id) else {
      return Err(Error::NotFound(format!("trigger node {trigger_id} not found")));
    };
    set_source_id(&mut node, Some(source_id.to_string()));
    self.node_repo.update_node(workflow_id, &node).await
  }

  /// Run the manager: consume domain events from the bus until cancelled,
  /// applying linear backoff restarts when the subscription drops, a
  /// trigger-binding reload on `SIGHUP`, and a clean exit on terminate
  /// (§4.1 "Restart and signal handling").
  pub async fn run(&self) -> Result<(), Error> {
    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
      .map_err(|e| Error::Fatal(format!("failed to install SIGHUP handler: {e}")))?;
    let mut restart_count: u32 = 0;
    loop {
      let mut subscription = self
        .bus
        .subscribe(topics::DOMAIN_EVENTS, "provider-manager")
        .await
        .map_err(|e| Error::TransientTransport(e.to_string()))?;

      loop {
        tokio::select! {
          _ = self.cancellation.cancelled() => {
            self.stop_all().await;
            return Ok(());
          }
          _ = tokio::signal::ctrl_c() => {
            tracing::info!("terminate signal received");
            self.stop_all().await;
            return Ok(());
          }
          _ = hangup.recv() => {
            tracing::info!("reload signal received, reapplying trigger bindings");
            self.reload().await;
          }
          delivery = subscription.recv() => {
            match delivery {
              Some(delivery) => self.handle_delivery(delivery).await,
              None => break,
            }
          }
        }
      }

      restart_count += 1;
      if restart_count > self.restart_max_attempts {
        tracing::error!(restart_count, "restart attempts exhausted, exiting");
        return Err(Error::Fatal("restart-loop exceeded".to_string()));
      }
      self.stop_all().await;
      tokio::time::sleep(self.restart_backoff * restart_count).await;
    }
  }

  /// Reapply every published workflow's trigger bindings in place, without
  /// restarting providers or dropping the domain-event subscription
  /// (§4.1 "Restart and signal handling" — reload versus terminate).
  async fn reload(&self) {
    let published = match self
      .workflow_repo
      .list(ListOptions {
        status: Some(WorkflowStatus::Published),
        limit: 0,
        after: None,
      })
      .await
    {
      Ok(page) => page.items,
      Err(error) => {
        tracing::error!(%error, "failed to list published workflows for reload");
        return;
      }
    };

    let mut counts = BatchCounts::default();
    for workflow in published {
      for node in published_trigger_nodes(&workflow.nodes) {
        self
          .configure_one(&workflow.id, &node.id, &node.node_type, node.config, &mut counts)
          .await;
      }
    }
    tracing::info!(success = counts.success, error = counts.error, "reapplied trigger bindings on reload");
  }

  async fn handle_delivery(&self, delivery: operion_bus::Delivery) {
    match serde_json::from_slice::<DomainEvent>(&delivery.payload) {
      Ok(event) => {
        let counts = self.apply_domain_event(event).await;
        tracing::debug!(success = counts.success, error = counts.error, "applied domain event batch");
      }
      Err(error) => tracing::warn!(%error, "malformed domain event payload"),
    }
  }

  async fn stop_all(&self) {
    let providers: Vec<Arc<dyn Provider>> = self.providers.read().await.values().cloned().collect();
    for provider in providers {
      if let Err(error) = provider.stop().await {
        tracing::warn!(provider = provider.id(), %error, "provider stop failed");
      }
    }
  }
}

fn set_source_id(node: &mut WorkflowNode, source_id: Option<String>) {
  node.source_id = source_id;
}

/// Build the `trigger_nodes[]` payload for a `WorkflowPublished`/
/// `WorkflowUnpublished` event from a workflow's trigger nodes.
pub fn published_trigger_nodes(nodes: &[WorkflowNode]) -> Vec<PublishedTriggerNode> {
  nodes
    .iter()
    .filter(|n| n.is_trigger())
    .map(|n| PublishedTriggerNode {
      id: n.id.clone(),
      node_type: n.node_type.clone(),
      config: n.config.clone(),
      source_id: n.source_id.clone(),
    })
    .collect()
}
