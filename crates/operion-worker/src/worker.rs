use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use operion_bus::{publish_json, topics, EventBus};
use operion_node::NodeRegistry;
use operion_repository::{ExecutionContextRepository, InputCoordinationRepository, WorkflowRepository};
use operion_types::{
  Connection, Error, ExecutionContext, ExecutionStatus, NodeExecuteItem, NodeInputState, NodeResult,
  NodeResultStatus, PortRef, Workflow, WorkflowNode, PORT_SUCCESS,
};
use tokio_util::sync::CancellationToken;

/// Input-state sweep reaps NodeInputStates older than this by default
/// (§4.4 "Input Coordinator" — "Abandoned states ... reaped by a background
/// sweep").
pub const DEFAULT_INPUT_MAX_AGE: chrono::Duration = chrono::Duration::minutes(10);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Consumes `node.execute` work items: fetches topology and execution
/// context, invokes node implementations, routes fired ports along
/// outgoing connections, and coordinates multi-input targets (§4.4).
pub struct Worker {
  bus: Arc<dyn EventBus>,
  workflow_repo: Arc<dyn WorkflowRepository>,
  execution_repo: Arc<dyn ExecutionContextRepository>,
  input_repo: Arc<dyn InputCoordinationRepository>,
  registry: Arc<NodeRegistry>,
  cancellation: CancellationToken,
  input_max_age: chrono::Duration,
  sweep_interval: Duration,
}

impl Worker {
  pub fn new(
    bus: Arc<dyn EventBus>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    execution_repo: Arc<dyn ExecutionContextRepository>,
    input_repo: Arc<dyn InputCoordinationRepository>,
    registry: Arc<NodeRegistry>,
  ) -> Self {
    Self {
      bus,
      workflow_repo,
      execution_repo,
      input_repo,
      registry,
      cancellation: CancellationToken::new(),
      input_max_age: DEFAULT_INPUT_MAX_AGE,
      sweep_interval: DEFAULT_SWEEP_INTERVAL,
    }
  }

  pub fn with_input_max_age(mut self, max_age: chrono::Duration) -> Self {
    self.input_max_age = max_age;
    self
  }

  pub fn cancellation(&self) -> CancellationToken {
    self.cancellation.clone()
  }

  /// Process one `node.execute` work item end to end.
  pub async fn process_item(&self, item: &NodeExecuteItem) -> Result<(), Error> {
    let mut ctx = self.execution_repo.load(&item.execution_id).await?;
    if ctx.status.is_terminal() {
      // At-least-once redelivery of an already-finished execution; ignore
      // (strong exactly-once semantics are an explicit non-goal).
      return Ok(());
    }

    let workflow = self.workflow_repo.get_by_id(&ctx.published_workflow_id).await?;
    let Some(node) = workflow.get_node(&item.node_id).cloned() else {
      return Err(Error::NotFound(format!(
        "node '{}' not found in workflow '{}'",
        item.node_id, workflow.id
      )));
    };

    let fired = if node.is_trigger() {
      // Trigger nodes are never executed; their only role is the starting
      // NodeResult the Activator already seeded (§4.5).
      match ctx.node_results.get(&node.id).cloned() {
        Some(result) => HashMap::from([(PORT_SUCCESS.to_string(), result)]),
        None => HashMap::new(),
      }
    } else {
      match self.execute_action_node(&node, &workflow, &mut ctx).await? {
        Some(fired) => fired,
        None => return Ok(()), // handed off to the input coordinator; nothing more to do yet
      }
    };

    self.route_outputs(&mut ctx, &workflow, &node.id, fired).await
  }

  async fn execute_action_node(
    &self,
    node: &WorkflowNode,
    workflow: &Workflow,
    ctx: &mut ExecutionContext,
  ) -> Result<Option<HashMap<String, NodeResult>>, Error> {
    if ctx.node_results.contains_key(&node.id) {
      // Already executed in this run (e.g. a fan-in node satisfied by one
      // branch under `wait_mode: any`, or an at-least-once redelivery of a
      // work item whose node already fired). Firing it again would violate
      // "runs exactly once" per execution, so treat this arrival as a no-op.
      self.settle_pending(ctx, 0).await?;
      return Ok(None);
    }

    let runtime = match self.registry.create(&node.node_type, &node.id, &node.config) {
      Ok(runtime) => runtime,
      Err(error) => {
        self.fail(ctx, format!("node factory error: {error}")).await?;
        return Ok(None);
      }
    };

    let requirements = runtime.input_requirements();
    let collected = collect_inputs(workflow, ctx, &node.id);

    let inputs = if requirements_met(&requirements, &collected) {
      collected
    } else {
      match self
        .coordinate(&node.id, &ctx.execution_id, &requirements, collected)
        .await?
      {
        Some(inputs) => inputs,
        None => {
          // Consumed this item without producing downstream work yet.
          self.settle_pending(ctx, 0).await?;
          return Ok(None);
        }
      }
    };

    match runtime.execute(ctx, inputs).await {
      Ok(outputs) => Ok(Some(outputs)),
      Err(error) => {
        self.fail(ctx, format!("node execution failed: {error}")).await?;
        Ok(None)
      }
    }
  }

  /// Load/create this node's coordination state, merge currently-available
  /// inputs, and either resolve (deleting the state) or persist it to wait
  /// for more arrivals (§4.4 "Input Coordinator").
  async fn coordinate(
    &self,
    node_id: &str,
    execution_id: &str,
    requirements: &operion_node::InputRequirements,
    collected: HashMap<String, NodeResult>,
  ) -> Result<Option<HashMap<String, NodeResult>>, Error> {
    let now = chrono::Utc::now();
    let mut state = match self.input_repo.find_pending(node_id, execution_id).await? {
      Some(existing) => existing,
      None => {
        let node_execution_id = format!("{execution_id}:{node_id}:{}", uuid::Uuid::new_v4());
        let timeout_deadline = requirements
          .timeout
          .and_then(|d| chrono::Duration::from_std(d).ok())
          .map(|d| now + d);
        NodeInputState::new(
          node_execution_id,
          node_id,
          execution_id,
          requirements.required_ports.clone(),
          requirements.wait_mode,
          timeout_deadline,
          now,
        )
      }
    };
    for (port, result) in collected {
      state.merge(port, result);
    }
    if state.is_ready() {
      self.input_repo.delete(&state.node_execution_id).await?;
      Ok(Some(state.arrived))
    } else {
      self.input_repo.save_input_state(&state).await?;
      Ok(None)
    }
  }

  /// Persist fired ports into `node_results`, route each along its
  /// outgoing connections, and update the pending-work counter that
  /// detects completion (§4.4 "Termination").
  async fn route_outputs(
    &self,
    ctx: &mut ExecutionContext,
    workflow: &Workflow,
    node_id: &str,
    fired: HashMap<String, NodeResult>,
  ) -> Result<(), Error> {
    let now = chrono::Utc::now();
    let mut enqueued: i64 = 0;
    let mut unhandled_error = false;

    for (port_name, result) in fired {
      ctx.record_result(result.clone(), now);
      let source_port = PortRef::new(node_id.to_string(), port_name.clone());
      let outgoing: Vec<&Connection> = workflow
        .connections
        .iter()
        .filter(|c| c.source_port == source_port)
        .collect();

      if outgoing.is_empty() {
        if result.status == NodeResultStatus::Error {
          unhandled_error = true;
        }
        continue;
      }

      for connection in outgoing {
        let work_item = NodeExecuteItem::new(ctx.execution_id.clone(), connection.target_port.node_id.clone());
        let key = format!("{}:{}", work_item.execution_id, work_item.node_id);
        publish_json(self.bus.as_ref(), topics::NODE_EXECUTE, Some(&key), &work_item)
          .await
          .map_err(|e| Error::TransientTransport(e.to_string()))?;
        enqueued += 1;
      }
    }

    if unhandled_error {
      ctx.transition(ExecutionStatus::Failed, now);
      return self.execution_repo.update(ctx).await;
    }

    self.settle_pending(ctx, enqueued).await
  }

  /// Decrement the pending-work counter by one (for the item just
  /// finished) and credit it for every new item just enqueued; the
  /// execution completes once it reaches zero.
  async fn settle_pending(&self, ctx: &mut ExecutionContext, enqueued: i64) -> Result<(), Error> {
    let now = chrono::Utc::now();
    let pending = ctx
      .metadata
      .get("pending_node_executions")
      .and_then(|v| v.as_i64())
      .unwrap_or(1)
      - 1
      + enqueued;
    ctx
      .metadata
      .insert("pending_node_executions".to_string(), serde_json::json!(pending.max(0)));
    ctx.updated_at = now;
    if pending <= 0 {
      ctx.transition(ExecutionStatus::Completed, now);
    }
    self.execution_repo.update(ctx).await
  }

  async fn fail(&self, ctx: &mut ExecutionContext, reason: String) -> Result<(), Error> {
    let now = chrono::Utc::now();
    ctx.metadata.insert("failure_reason".to_string(), serde_json::json!(reason));
    ctx.transition(ExecutionStatus::Failed, now);
    self.execution_repo.update(ctx).await
  }

  /// Reap NodeInputStates older than `max_age`; their executions fail with
  /// reason *input timeout* (§4.4 "Input Coordinator").
  pub async fn sweep_expired_inputs(&self) -> Result<usize, Error> {
    let expired = self.input_repo.cleanup_expired(self.input_max_age).await?;
    let mut reaped = 0;
    for node_execution_id in expired {
      let Some(execution_id) = node_execution_id.split(':').next() else {
        continue;
      };
      match self.execution_repo.load(execution_id).await {
        Ok(mut ctx) if !ctx.status.is_terminal() => {
          if let Err(error) = self.fail(&mut ctx, "input timeout".to_string()).await {
            tracing::warn!(%error, execution_id, "failed to persist input-timeout failure");
          } else {
            reaped += 1;
          }
        }
        Ok(_) => {}
        Err(error) => tracing::warn!(%error, execution_id, "failed to load execution for expired input state"),
      }
    }
    Ok(reaped)
  }

  /// Run until cancelled, terminated, or the subscription closes.
  pub async fn run(&self) -> Result<(), Error> {
    let mut subscription = self
      .bus
      .subscribe(topics::NODE_EXECUTE, "worker")
      .await
      .map_err(|e| Error::TransientTransport(e.to_string()))?;
    let mut sweep = tokio::time::interval(self.sweep_interval);

    loop {
      tokio::select! {
        _ = self.cancellation.cancelled() => return Ok(()),
        _ = tokio::signal::ctrl_c() => {
          tracing::info!("terminate signal received");
          return Ok(());
        }
        _ = sweep.tick() => {
          if let Err(error) = self.sweep_expired_inputs().await {
            tracing::warn!(%error, "input-state sweep failed");
          }
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
    match serde_json::from_slice::<NodeExecuteItem>(&delivery.payload) {
      Ok(item) => {
        if let Err(error) = self.process_item(&item).await {
          tracing::warn!(%error, execution_id = item.execution_id, node_id = item.node_id, "node execution item failed");
        }
      }
      Err(error) => tracing::warn!(%error, "malformed node-execute payload"),
    }
  }
}

/// For each connection landing on `node_id`, the producer's `NodeResult`
/// if that producer has already fired, keyed by this node's own input
/// port (the connection's target port) rather than the source port.
fn collect_inputs(workflow: &Workflow, ctx: &ExecutionContext, node_id: &str) -> HashMap<String, NodeResult> {
  workflow
    .connections
    .iter()
    .filter(|c| c.target_port.node_id == node_id)
    .filter_map(|c| {
      ctx
        .node_results
        .get(&c.source_port.node_id)
        .cloned()
        .map(|result| (c.target_port.port_name.clone(), result))
    })
    .collect()
}

fn requirements_met(requirements: &operion_node::InputRequirements, collected: &HashMap<String, NodeResult>) -> bool {
  match requirements.wait_mode {
    operion_types::WaitMode::All => requirements.required_ports.iter().all(|p| collected.contains_key(p)),
    operion_types::WaitMode::Any => !collected.is_empty(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use operion_bus::InMemoryBus;
  use operion_repository::InMemoryRepositories;
  use operion_types::{NodeCategory, WorkflowStatus};

  fn node(id: &str, node_type: &str, category: NodeCategory, config: HashMap<String, serde_json::Value>) -> WorkflowNode {
    WorkflowNode {
      id: id.into(),
      node_type: node_type.into(),
      category,
      config,
      name: id.into(),
      enabled: true,
      position: None,
      source_id: None,
      provider_id: None,
      event_type: None,
    }
  }

  fn seeded_context(workflow_id: &str, trigger_id: &str, data: serde_json::Value) -> ExecutionContext {
    let now = chrono::Utc::now();
    let mut ctx = ExecutionContext::new("ex-1", workflow_id, data.clone(), HashMap::new(), now);
    ctx.metadata.insert("pending_node_executions".to_string(), serde_json::json!(1));
    ctx.transition(ExecutionStatus::Running, now);
    ctx.record_result(NodeResult::success(trigger_id, data), now);
    ctx
  }

  async fn setup(workflow: Workflow) -> (Worker, Arc<InMemoryRepositories>, Arc<dyn EventBus>) {
    let repo = Arc::new(InMemoryRepositories::new());
    WorkflowRepository::save(repo.as_ref(), &workflow).await.unwrap();
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let worker = Worker::new(
      bus.clone(),
      repo.clone(),
      repo.clone(),
      repo.clone(),
      Arc::new(NodeRegistry::with_builtins()),
    );
    (worker, repo, bus)
  }

  #[tokio::test]
  async fn trigger_to_single_action_completes() {
    let trigger = node("t1", "trigger:webhook", NodeCategory::Trigger, HashMap::new());
    let mut log_config = HashMap::new();
    log_config.insert("message".to_string(), serde_json::json!("{{.trigger_data.hello}}"));
    let action = node("log1", "builtin:log", NodeCategory::Action, log_config);
    let workflow = Workflow {
      id: "wf-1".into(),
      workflow_group_id: "grp-1".into(),
      status: WorkflowStatus::Published,
      nodes: vec![trigger, action],
      connections: vec![Connection::new(
        PortRef::new("t1", PORT_SUCCESS),
        PortRef::new("log1", "in"),
      )],
      variables: HashMap::new(),
      name: "wf".into(),
      description: None,
      owner: None,
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
      published_id: None,
    };
    let (worker, repo, _bus) = setup(workflow).await;

    let ctx = seeded_context("wf-1", "t1", serde_json::json!({"hello": "world"}));
    repo.save(&ctx).await.unwrap();

    worker.process_item(&NodeExecuteItem::new("ex-1", "t1")).await.unwrap();
    let after_trigger = repo.load("ex-1").await.unwrap();
    assert_eq!(after_trigger.status, ExecutionStatus::Running);

    worker.process_item(&NodeExecuteItem::new("ex-1", "log1")).await.unwrap();
    let done = repo.load("ex-1").await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(
      done.node_results.get("log1").unwrap().data,
      serde_json::json!({"hello": "world"})
    );
  }

  #[tokio::test]
  async fn merge_waits_for_both_branches_then_fires_once() {
    let trigger = node("t1", "trigger:webhook", NodeCategory::Trigger, HashMap::new());
    let branch_a = node("a", "builtin:log", NodeCategory::Action, HashMap::from([("message".to_string(), serde_json::json!("a"))]));
    let branch_b = node("b", "builtin:log", NodeCategory::Action, HashMap::from([("message".to_string(), serde_json::json!("b"))]));
    let merge = node(
      "m",
      "builtin:merge",
      NodeCategory::Action,
      HashMap::from([("ports".to_string(), serde_json::json!(["a", "b"]))]),
    );
    let workflow = Workflow {
      id: "wf-2".into(),
      workflow_group_id: "grp-2".into(),
      status: WorkflowStatus::Published,
      nodes: vec![trigger, branch_a, branch_b, merge],
      connections: vec![
        Connection::new(PortRef::new("t1", PORT_SUCCESS), PortRef::new("a", "in")),
        Connection::new(PortRef::new("t1", PORT_SUCCESS), PortRef::new("b", "in")),
        Connection::new(PortRef::new("a", PORT_SUCCESS), PortRef::new("m", "a")),
        Connection::new(PortRef::new("b", PORT_SUCCESS), PortRef::new("m", "b")),
      ],
      variables: HashMap::new(),
      name: "wf".into(),
      description: None,
      owner: None,
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
      published_id: None,
    };
    let (worker, repo, _bus) = setup(workflow).await;

    let ctx = seeded_context("wf-2", "t1", serde_json::json!({}));
    repo.save(&ctx).await.unwrap();

    // Drives routing directly rather than through the bus, since these
    // tests don't run a live subscriber loop.
    worker.process_item(&NodeExecuteItem::new("ex-1", "t1")).await.unwrap();
    worker.process_item(&NodeExecuteItem::new("ex-1", "a")).await.unwrap();
    worker.process_item(&NodeExecuteItem::new("ex-1", "m")).await.unwrap();
    let mid = repo.load("ex-1").await.unwrap();
    assert!(!mid.node_results.contains_key("m"));
    assert_eq!(mid.status, ExecutionStatus::Running);

    worker.process_item(&NodeExecuteItem::new("ex-1", "b")).await.unwrap();
    worker.process_item(&NodeExecuteItem::new("ex-1", "m")).await.unwrap();
    let done = repo.load("ex-1").await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(
      done.node_results.get("m").unwrap().data,
      serde_json::json!({"a": {}, "b": {}})
    );
  }

  #[tokio::test]
  async fn any_merge_fires_exactly_once_despite_late_second_branch() {
    let trigger = node("t1", "trigger:webhook", NodeCategory::Trigger, HashMap::new());
    let branch_a = node("a", "builtin:log", NodeCategory::Action, HashMap::from([("message".to_string(), serde_json::json!("a"))]));
    let branch_b = node("b", "builtin:log", NodeCategory::Action, HashMap::from([("message".to_string(), serde_json::json!("b"))]));
    let merge = node(
      "m",
      "builtin:merge",
      NodeCategory::Action,
      HashMap::from([
        ("ports".to_string(), serde_json::json!(["a", "b"])),
        ("wait_mode".to_string(), serde_json::json!("any")),
      ]),
    );
    let workflow = Workflow {
      id: "wf-4".into(),
      workflow_group_id: "grp-4".into(),
      status: WorkflowStatus::Published,
      nodes: vec![trigger, branch_a, branch_b, merge],
      connections: vec![
        Connection::new(PortRef::new("t1", PORT_SUCCESS), PortRef::new("a", "in")),
        Connection::new(PortRef::new("t1", PORT_SUCCESS), PortRef::new("b", "in")),
        Connection::new(PortRef::new("a", PORT_SUCCESS), PortRef::new("m", "a")),
        Connection::new(PortRef::new("b", PORT_SUCCESS), PortRef::new("m", "b")),
      ],
      variables: HashMap::new(),
      name: "wf".into(),
      description: None,
      owner: None,
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
      published_id: None,
    };
    let (worker, repo, _bus) = setup(workflow).await;

    let ctx = seeded_context("wf-4", "t1", serde_json::json!({}));
    repo.save(&ctx).await.unwrap();

    worker.process_item(&NodeExecuteItem::new("ex-1", "t1")).await.unwrap();
    worker.process_item(&NodeExecuteItem::new("ex-1", "a")).await.unwrap();
    // First arrival for "m": "any" mode, one port already satisfies it.
    worker.process_item(&NodeExecuteItem::new("ex-1", "m")).await.unwrap();
    let after_first = repo.load("ex-1").await.unwrap();
    assert_eq!(after_first.node_results.get("m").unwrap().data, serde_json::json!({"a": {}}));

    worker.process_item(&NodeExecuteItem::new("ex-1", "b")).await.unwrap();
    // Second, later arrival for "m" must not re-fire it with both ports.
    worker.process_item(&NodeExecuteItem::new("ex-1", "m")).await.unwrap();
    let after_second = repo.load("ex-1").await.unwrap();
    assert_eq!(after_second.node_results.get("m").unwrap().data, serde_json::json!({"a": {}}));
    assert_eq!(after_second.status, ExecutionStatus::Completed);
  }

  #[tokio::test]
  async fn unhandled_error_port_fails_the_execution() {
    let trigger = node("t1", "trigger:webhook", NodeCategory::Trigger, HashMap::new());
    let mut http_config = HashMap::new();
    http_config.insert("host".to_string(), serde_json::json!("http://127.0.0.1:1"));
    http_config.insert("path".to_string(), serde_json::json!("/"));
    let http_node = node("h1", "builtin:http_request", NodeCategory::Action, http_config);
    let workflow = Workflow {
      id: "wf-3".into(),
      workflow_group_id: "grp-3".into(),
      status: WorkflowStatus::Published,
      nodes: vec![trigger, http_node],
      connections: vec![Connection::new(
        PortRef::new("t1", PORT_SUCCESS),
        PortRef::new("h1", "in"),
      )],
      variables: HashMap::new(),
      name: "wf".into(),
      description: None,
      owner: None,
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
      published_id: None,
    };
    let (worker, repo, _bus) = setup(workflow).await;
    let ctx = seeded_context("wf-3", "t1", serde_json::json!({}));
    repo.save(&ctx).await.unwrap();

    worker.process_item(&NodeExecuteItem::new("ex-1", "t1")).await.unwrap();
    worker.process_item(&NodeExecuteItem::new("ex-1", "h1")).await.unwrap();

    let done = repo.load("ex-1").await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Failed);
  }
}
