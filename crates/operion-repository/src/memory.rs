use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use operion_types::{
  Error, ExecutionContext, ExecutionStatus, NodeInputState, Schedule, Workflow, WorkflowNode,
  WorkflowStatus,
};
use tokio::sync::RwLock;

use crate::traits::{
  ExecutionContextRepository, InputCoordinationRepository, ListOptions, ListPage, NodeRepository,
  Result, ScheduleRepository, TriggerMatch, WorkflowRepository,
};

/// In-memory reference implementation of all four §6.4 repositories plus
/// the scheduler's private schedule store. Used by the Activator/Worker
/// test suites and as a single-process development backend.
#[derive(Clone, Default)]
pub struct InMemoryRepositories {
  workflows: Arc<RwLock<HashMap<String, Workflow>>>,
  executions: Arc<RwLock<HashMap<String, ExecutionContext>>>,
  input_states: Arc<RwLock<HashMap<String, NodeInputState>>>,
  schedules: Arc<RwLock<HashMap<String, Schedule>>>,
}

impl InMemoryRepositories {
  pub fn new() -> Self {
    Self::default()
  }

  fn match_trigger_nodes(
    workflows: &HashMap<String, Workflow>,
    source_id: &str,
    event_type: &str,
    provider_id: &str,
  ) -> Vec<TriggerMatch> {
    let mut matches = Vec::new();
    for workflow in workflows.values() {
      if workflow.status != WorkflowStatus::Published {
        continue;
      }
      for node in workflow.trigger_nodes() {
        let Some(node_source_id) = node.source_id.as_deref() else {
          continue;
        };
        if node_source_id != source_id {
          continue;
        }
        if node.provider_id.as_deref() != Some(provider_id) {
          continue;
        }
        // A null event_type on the trigger node matches any incoming event.
        let event_matches = node
          .event_type
          .as_deref()
          .map(|t| t == event_type)
          .unwrap_or(true);
        if !event_matches {
          continue;
        }
        matches.push(TriggerMatch {
          workflow_id: workflow.id.clone(),
          node: node.clone(),
        });
      }
    }
    matches
  }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepositories {
  async fn list(&self, options: ListOptions) -> Result<ListPage<Workflow>> {
    let workflows = self.workflows.read().await;
    let mut items: Vec<Workflow> = workflows
      .values()
      .filter(|w| options.status.map(|s| w.status == s).unwrap_or(true))
      .cloned()
      .collect();
    items.sort_by(|a, b| a.id.cmp(&b.id));
    let total = items.len();
    let limit = if options.limit == 0 { total } else { options.limit };
    let has_next = items.len() > limit;
    items.truncate(limit);
    Ok(ListPage {
      items,
      total,
      has_next,
    })
  }

  async fn get_by_id(&self, id: &str) -> Result<Workflow> {
    self
      .workflows
      .read()
      .await
      .get(id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("workflow '{}'", id)))
  }

  async fn save(&self, workflow: &Workflow) -> Result<()> {
    self
      .workflows
      .write()
      .await
      .insert(workflow.id.clone(), workflow.clone());
    Ok(())
  }

  async fn find_trigger_nodes_by(
    &self,
    source_id: &str,
    event_type: &str,
    provider_id: &str,
  ) -> Result<Vec<TriggerMatch>> {
    let workflows = self.workflows.read().await;
    Ok(Self::match_trigger_nodes(
      &workflows, source_id, event_type, provider_id,
    ))
  }
}

#[async_trait]
impl NodeRepository for InMemoryRepositories {
  async fn get_nodes_from_published(&self, published_workflow_id: &str) -> Result<Vec<WorkflowNode>> {
    let workflow = WorkflowRepository::get_by_id(self, published_workflow_id).await?;
    Ok(workflow.nodes)
  }

  async fn save_node(&self, workflow_id: &str, node: &WorkflowNode) -> Result<()> {
    let mut workflows = self.workflows.write().await;
    let workflow = workflows
      .get_mut(workflow_id)
      .ok_or_else(|| Error::NotFound(format!("workflow '{}'", workflow_id)))?;
    workflow.nodes.push(node.clone());
    Ok(())
  }

  async fn update_node(&self, workflow_id: &str, node: &WorkflowNode) -> Result<()> {
    let mut workflows = self.workflows.write().await;
    let workflow = workflows
      .get_mut(workflow_id)
      .ok_or_else(|| Error::NotFound(format!("workflow '{}'", workflow_id)))?;
    match workflow.nodes.iter_mut().find(|n| n.id == node.id) {
      Some(existing) => *existing = node.clone(),
      None => return Err(Error::NotFound(format!("node '{}'", node.id))),
    }
    Ok(())
  }

  async fn find_trigger_nodes_by(
    &self,
    source_id: &str,
    event_type: &str,
    provider_id: &str,
  ) -> Result<Vec<TriggerMatch>> {
    WorkflowRepository::find_trigger_nodes_by(self, source_id, event_type, provider_id).await
  }
}

#[async_trait]
impl ExecutionContextRepository for InMemoryRepositories {
  async fn save(&self, context: &ExecutionContext) -> Result<()> {
    self
      .executions
      .write()
      .await
      .insert(context.execution_id.clone(), context.clone());
    Ok(())
  }

  async fn load(&self, execution_id: &str) -> Result<ExecutionContext> {
    self
      .executions
      .read()
      .await
      .get(execution_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("execution '{}'", execution_id)))
  }

  async fn update(&self, context: &ExecutionContext) -> Result<()> {
    self
      .executions
      .write()
      .await
      .insert(context.execution_id.clone(), context.clone());
    Ok(())
  }

  async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionContext>> {
    Ok(
      self
        .executions
        .read()
        .await
        .values()
        .filter(|e| e.status == status)
        .cloned()
        .collect(),
    )
  }

  async fn list_by_workflow(&self, published_workflow_id: &str) -> Result<Vec<ExecutionContext>> {
    Ok(
      self
        .executions
        .read()
        .await
        .values()
        .filter(|e| e.published_workflow_id == published_workflow_id)
        .cloned()
        .collect(),
    )
  }
}

#[async_trait]
impl InputCoordinationRepository for InMemoryRepositories {
  async fn save_input_state(&self, state: &NodeInputState) -> Result<()> {
    self
      .input_states
      .write()
      .await
      .insert(state.node_execution_id.clone(), state.clone());
    Ok(())
  }

  async fn load_input_state(&self, node_execution_id: &str) -> Result<NodeInputState> {
    self
      .input_states
      .read()
      .await
      .get(node_execution_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("input state '{}'", node_execution_id)))
  }

  async fn find_pending(&self, node_id: &str, execution_id: &str) -> Result<Option<NodeInputState>> {
    let states = self.input_states.read().await;
    Ok(
      states
        .values()
        .filter(|s| s.node_id == node_id && s.execution_id == execution_id)
        .min_by_key(|s| s.created_at)
        .cloned(),
    )
  }

  async fn delete(&self, node_execution_id: &str) -> Result<()> {
    self.input_states.write().await.remove(node_execution_id);
    Ok(())
  }

  async fn cleanup_expired(&self, max_age: chrono::Duration) -> Result<Vec<String>> {
    let now = chrono::Utc::now();
    let mut states = self.input_states.write().await;
    let expired: Vec<String> = states
      .values()
      .filter(|s| s.is_expired(now, max_age))
      .map(|s| s.node_execution_id.clone())
      .collect();
    for id in &expired {
      states.remove(id);
    }
    Ok(expired)
  }
}

#[async_trait]
impl ScheduleRepository for InMemoryRepositories {
  async fn upsert(&self, schedule: &Schedule) -> Result<()> {
    self
      .schedules
      .write()
      .await
      .insert(schedule.source_id.clone(), schedule.clone());
    Ok(())
  }

  async fn get_by_source_id(&self, source_id: &str) -> Result<Option<Schedule>> {
    Ok(self.schedules.read().await.get(source_id).cloned())
  }

  async fn due(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Schedule>> {
    let schedules = self.schedules.read().await;
    let mut due: Vec<Schedule> = schedules
      .values()
      .filter(|s| s.active && s.next_due_at <= now)
      .cloned()
      .collect();
    due.sort_by(|a, b| a.next_due_at.cmp(&b.next_due_at).then(a.source_id.cmp(&b.source_id)));
    Ok(due)
  }

  async fn remove(&self, source_id: &str) -> Result<()> {
    self.schedules.write().await.remove(source_id);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use operion_types::{NodeCategory, WorkflowNode};
  use std::collections::HashMap as StdHashMap;

  fn published_workflow_with_trigger() -> Workflow {
    let node = WorkflowNode {
      id: "t1".into(),
      node_type: "trigger:webhook".into(),
      category: NodeCategory::Trigger,
      config: StdHashMap::new(),
      name: "t1".into(),
      enabled: true,
      position: None,
      source_id: Some("src-1".into()),
      provider_id: Some("webhook".into()),
      event_type: Some("request".into()),
    };
    Workflow {
      id: "wf-1".into(),
      workflow_group_id: "grp-1".into(),
      status: WorkflowStatus::Published,
      nodes: vec![node],
      connections: vec![],
      variables: StdHashMap::new(),
      name: "wf".into(),
      description: None,
      owner: None,
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
      published_id: None,
    }
  }

  #[tokio::test]
  async fn draft_workflows_are_not_matched() {
    let repo = InMemoryRepositories::new();
    let mut workflow = published_workflow_with_trigger();
    workflow.status = WorkflowStatus::Draft;
    WorkflowRepository::save(&repo, &workflow).await.unwrap();

    let matches = WorkflowRepository::find_trigger_nodes_by(&repo, "src-1", "request", "webhook")
      .await
      .unwrap();
    assert!(matches.is_empty());
  }

  #[tokio::test]
  async fn published_workflow_trigger_matches() {
    let repo = InMemoryRepositories::new();
    let workflow = published_workflow_with_trigger();
    WorkflowRepository::save(&repo, &workflow).await.unwrap();

    let matches = WorkflowRepository::find_trigger_nodes_by(&repo, "src-1", "request", "webhook")
      .await
      .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].workflow_id, "wf-1");
  }

  #[tokio::test]
  async fn find_pending_returns_oldest_state() {
    let repo = InMemoryRepositories::new();
    let older = NodeInputState::new(
      "ne-old",
      "merge",
      "ex-1",
      vec!["a".into()],
      operion_types::WaitMode::All,
      None,
      chrono::Utc::now() - chrono::Duration::seconds(10),
    );
    let newer = NodeInputState::new(
      "ne-new",
      "merge",
      "ex-1",
      vec!["a".into()],
      operion_types::WaitMode::All,
      None,
      chrono::Utc::now(),
    );
    repo.save_input_state(&older).await.unwrap();
    repo.save_input_state(&newer).await.unwrap();

    let pending = repo.find_pending("merge", "ex-1").await.unwrap().unwrap();
    assert_eq!(pending.node_execution_id, "ne-old");
  }
}
