use async_trait::async_trait;
use operion_types::{
  ExecutionContext, ExecutionStatus, NodeInputState, Schedule, Workflow, WorkflowNode,
  WorkflowStatus,
};

pub type Result<T> = std::result::Result<T, operion_types::Error>;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
  pub status: Option<WorkflowStatus>,
  pub limit: usize,
  /// Opaque pagination cursor; `None` starts from the beginning.
  pub after: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListPage<T> {
  pub items: Vec<T>,
  pub total: usize,
  pub has_next: bool,
}

/// A trigger node matched against `(source_id, event_type, provider_id)`,
/// paired with the published workflow it belongs to.
#[derive(Debug, Clone)]
pub struct TriggerMatch {
  pub workflow_id: String,
  pub node: WorkflowNode,
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
  async fn list(&self, options: ListOptions) -> Result<ListPage<Workflow>>;
  async fn get_by_id(&self, id: &str) -> Result<Workflow>;
  async fn save(&self, workflow: &Workflow) -> Result<()>;

  /// Find trigger nodes across all *published* workflows matching the
  /// triple; a `None` `event_type` on the trigger node matches any incoming
  /// event type (§4.3).
  async fn find_trigger_nodes_by(
    &self,
    source_id: &str,
    event_type: &str,
    provider_id: &str,
  ) -> Result<Vec<TriggerMatch>>;
}

#[async_trait]
pub trait NodeRepository: Send + Sync {
  async fn get_nodes_from_published(&self, published_workflow_id: &str) -> Result<Vec<WorkflowNode>>;
  async fn save_node(&self, workflow_id: &str, node: &WorkflowNode) -> Result<()>;
  async fn update_node(&self, workflow_id: &str, node: &WorkflowNode) -> Result<()>;
  async fn find_trigger_nodes_by(
    &self,
    source_id: &str,
    event_type: &str,
    provider_id: &str,
  ) -> Result<Vec<TriggerMatch>>;
}

#[async_trait]
pub trait ExecutionContextRepository: Send + Sync {
  async fn save(&self, context: &ExecutionContext) -> Result<()>;
  async fn load(&self, execution_id: &str) -> Result<ExecutionContext>;
  async fn update(&self, context: &ExecutionContext) -> Result<()>;
  async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionContext>>;
  async fn list_by_workflow(&self, published_workflow_id: &str) -> Result<Vec<ExecutionContext>>;
}

#[async_trait]
pub trait InputCoordinationRepository: Send + Sync {
  async fn save_input_state(&self, state: &NodeInputState) -> Result<()>;
  async fn load_input_state(&self, node_execution_id: &str) -> Result<NodeInputState>;
  /// The oldest pending state for `(node_id, execution_id)`, FIFO across
  /// loop iterations (§9).
  async fn find_pending(&self, node_id: &str, execution_id: &str) -> Result<Option<NodeInputState>>;
  async fn delete(&self, node_execution_id: &str) -> Result<()>;
  /// Reap states older than `max_age`; returns the deleted ids.
  async fn cleanup_expired(&self, max_age: chrono::Duration) -> Result<Vec<String>>;
}

/// Scheduler-provider-private persistence; not part of the core §6.4
/// contract but exposed from this crate for the reference scheduler
/// provider to depend on the same in-memory/sqlite machinery.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
  async fn upsert(&self, schedule: &Schedule) -> Result<()>;
  async fn get_by_source_id(&self, source_id: &str) -> Result<Option<Schedule>>;
  async fn due(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Schedule>>;
  async fn remove(&self, source_id: &str) -> Result<()>;
}
