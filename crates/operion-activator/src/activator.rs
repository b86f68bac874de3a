use std::sync::Arc;

use operion_bus::{publish_json, topics, EventBus};
use operion_repository::{ExecutionContextRepository, NodeRepository, WorkflowRepository};
use operion_types::{Error, ExecutionContext, ExecutionStatus, NodeExecuteItem, NodeResult, SourceEvent};
use tokio_util::sync::CancellationToken;

/// Consumes source events and seeds executions for every published trigger
/// node they match (§4.3).
pub struct Activator {
  bus: Arc<dyn EventBus>,
  node_repo: Arc<dyn NodeRepository>,
  workflow_repo: Arc<dyn WorkflowRepository>,
  execution_repo: Arc<dyn ExecutionContextRepository>,
  cancellation: CancellationToken,
}

/// Outcome of activating the matches for one source event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActivationCounts {
  pub matched: usize,
  pub failed: usize,
}

impl Activator {
  pub fn new(
    bus: Arc<dyn EventBus>,
    node_repo: Arc<dyn NodeRepository>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    execution_repo: Arc<dyn ExecutionContextRepository>,
  ) -> Self {
    Self {
      bus,
      node_repo,
      workflow_repo,
      execution_repo,
      cancellation: CancellationToken::new(),
    }
  }

  pub fn cancellation(&self) -> CancellationToken {
    self.cancellation.clone()
  }

  /// Match `event` against every published trigger node and seed one
  /// execution per match. Duplicate matches are expected and handled
  /// (at-least-once, §4.3 "Matching algorithm"); per-match failures are
  /// logged and counted, never aborting the rest of the batch.
  pub async fn activate(&self, event: &SourceEvent) -> Result<ActivationCounts, Error> {
    event.validate()?;
    let matches = self
      .node_repo
      .find_trigger_nodes_by(&event.source_id, &event.event_type, &event.provider_id)
      .await?;

    let mut counts = ActivationCounts::default();
    for m in matches {
      match self.seed_execution(&m.workflow_id, &m.node.id, event).await {
        Ok(()) => counts.matched += 1,
        Err(error) => {
          tracing::warn!(
            workflow_id = m.workflow_id,
            node_id = m.node.id,
            %error,
            "failed to seed execution for trigger match"
          );
          counts.failed += 1;
        }
      }
    }
    Ok(counts)
  }

  async fn seed_execution(&self, workflow_id: &str, trigger_node_id: &str, event: &SourceEvent) -> Result<(), Error> {
    let workflow = self.workflow_repo.get_by_id(workflow_id).await?;
    let now = chrono::Utc::now();
    let execution_id = uuid::Uuid::new_v4().to_string();

    let mut context = ExecutionContext::new(
      execution_id.clone(),
      workflow_id.to_string(),
      event.event_data.clone(),
      workflow.variables.clone(),
      now,
    );
    context.record_result(
      NodeResult::success(trigger_node_id.to_string(), event.event_data.clone()),
      now,
    );
    context.transition(ExecutionStatus::Running, now);
    self.execution_repo.save(&context).await?;

    let item = NodeExecuteItem::new(execution_id.clone(), trigger_node_id.to_string());
    let key = format!("{}:{}", item.execution_id, item.node_id);
    publish_json(self.bus.as_ref(), topics::NODE_EXECUTE, Some(&key), &item)
      .await
      .map_err(|e| Error::TransientTransport(e.to_string()))
  }

  /// Run until cancelled or the subscription closes.
  pub async fn run(&self) -> Result<(), Error> {
    let mut subscription = self
      .bus
      .subscribe(topics::SOURCE_EVENTS, "activator")
      .await
      .map_err(|e| Error::TransientTransport(e.to_string()))?;

    loop {
      tokio::select! {
        _ = self.cancellation.cancelled() => return Ok(()),
        _ = tokio::signal::ctrl_c() => {
          tracing::info!("terminate signal received");
          return Ok(());
        }
        delivery = subscription.recv() => {
          match delivery {
            Some(delivery) => self.handle_delivery(delivery).await,
            None => return Ok(()),
          }
        }
      }
    }
  }

  async fn handle_delivery(&self, delivery: operion_bus::Delivery) {
    match serde_json::from_slice::<SourceEvent>(&delivery.payload) {
      Ok(event) => match self.activate(&event).await {
        Ok(counts) => tracing::debug!(
          source_id = event.source_id,
          matched = counts.matched,
          failed = counts.failed,
          "activated source event"
        ),
        Err(error) => tracing::warn!(%error, source_id = event.source_id, "activation failed"),
      },
      Err(error) => tracing::warn!(%error, "malformed source event payload"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use operion_bus::InMemoryBus;
  use operion_repository::InMemoryRepositories;
  use operion_types::{NodeCategory, Workflow, WorkflowNode, WorkflowStatus};
  use std::collections::HashMap;

  fn trigger_workflow() -> Workflow {
    let node = WorkflowNode {
      id: "t1".into(),
      node_type: "trigger:webhook".into(),
      category: NodeCategory::Trigger,
      config: HashMap::new(),
      name: "t1".into(),
      enabled: true,
      position: None,
      source_id: Some("src-1".into()),
      provider_id: Some("webhook".into()),
      event_type: Some("WebhookReceived".into()),
    };
    Workflow {
      id: "wf-1".into(),
      workflow_group_id: "grp-1".into(),
      status: WorkflowStatus::Published,
      nodes: vec![node],
      connections: vec![],
      variables: HashMap::from([("env".to_string(), serde_json::json!("prod"))]),
      name: "wf".into(),
      description: None,
      owner: None,
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
      published_id: None,
    }
  }

  #[tokio::test]
  async fn matching_event_seeds_one_execution() {
    let repo = Arc::new(InMemoryRepositories::new());
    WorkflowRepository::save(repo.as_ref(), &trigger_workflow()).await.unwrap();
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let activator = Activator::new(bus, repo.clone(), repo.clone(), repo.clone());

    let event = SourceEvent {
      source_id: "src-1".into(),
      provider_id: "webhook".into(),
      event_type: "WebhookReceived".into(),
      event_data: serde_json::json!({"hello": "world"}),
      occurred_at: chrono::Utc::now(),
    };
    let counts = activator.activate(&event).await.unwrap();
    assert_eq!(counts.matched, 1);
    assert_eq!(counts.failed, 0);

    let executions = repo.list_by_workflow("wf-1").await.unwrap();
    assert_eq!(executions.len(), 1);
    let ctx = &executions[0];
    assert_eq!(ctx.status, ExecutionStatus::Running);
    assert_eq!(ctx.variables.get("env").unwrap(), "prod");
    assert_eq!(
      ctx.node_results.get("t1").unwrap().data,
      serde_json::json!({"hello": "world"})
    );
  }

  #[tokio::test]
  async fn non_matching_event_type_seeds_nothing() {
    let repo = Arc::new(InMemoryRepositories::new());
    WorkflowRepository::save(repo.as_ref(), &trigger_workflow()).await.unwrap();
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let activator = Activator::new(bus, repo.clone(), repo.clone(), repo.clone());

    let event = SourceEvent {
      source_id: "src-1".into(),
      provider_id: "webhook".into(),
      event_type: "SomethingElse".into(),
      event_data: serde_json::json!({}),
      occurred_at: chrono::Utc::now(),
    };
    let counts = activator.activate(&event).await.unwrap();
    assert_eq!(counts.matched, 0);
  }

  #[tokio::test]
  async fn duplicate_delivery_seeds_two_independent_executions() {
    let repo = Arc::new(InMemoryRepositories::new());
    WorkflowRepository::save(repo.as_ref(), &trigger_workflow()).await.unwrap();
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let activator = Activator::new(bus, repo.clone(), repo.clone(), repo.clone());

    let event = SourceEvent {
      source_id: "src-1".into(),
      provider_id: "webhook".into(),
      event_type: "WebhookReceived".into(),
      event_data: serde_json::json!({}),
      occurred_at: chrono::Utc::now(),
    };
    activator.activate(&event).await.unwrap();
    activator.activate(&event).await.unwrap();

    let executions = repo.list_by_workflow("wf-1").await.unwrap();
    assert_eq!(executions.len(), 2);
    assert_ne!(executions[0].execution_id, executions[1].execution_id);
  }
}
