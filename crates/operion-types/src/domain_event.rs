use serde::{Deserialize, Serialize};

/// One trigger node as carried on a `WorkflowPublished`/`WorkflowUnpublished`
/// event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedTriggerNode {
  pub id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default)]
  pub config: std::collections::HashMap<String, serde_json::Value>,
  #[serde(default)]
  pub source_id: Option<String>,
}

/// Domain (workflow/trigger lifecycle) events, published on topics
/// `workflow.*` / `trigger.*`. Distinct from [`crate::SourceEvent`], which
/// carries externally-observed occurrences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
  TriggerCreated {
    trigger_id: String,
    workflow_id: String,
    node_type: String,
    config: std::collections::HashMap<String, serde_json::Value>,
    actor: String,
  },
  TriggerUpdated {
    trigger_id: String,
    workflow_id: String,
    node_type: String,
    config: std::collections::HashMap<String, serde_json::Value>,
    previous_config: std::collections::HashMap<String, serde_json::Value>,
    actor: String,
  },
  TriggerDeleted {
    trigger_id: String,
    workflow_id: String,
    node_type: String,
    #[serde(default)]
    source_id: Option<String>,
    actor: String,
  },
  WorkflowPublished {
    workflow_id: String,
    workflow_name: String,
    trigger_nodes: Vec<PublishedTriggerNode>,
    actor: String,
  },
  WorkflowUnpublished {
    workflow_id: String,
    workflow_name: String,
    trigger_nodes: Vec<PublishedTriggerNode>,
    actor: String,
  },
}

impl DomainEvent {
  pub fn workflow_id(&self) -> &str {
    match self {
      DomainEvent::TriggerCreated { workflow_id, .. }
      | DomainEvent::TriggerUpdated { workflow_id, .. }
      | DomainEvent::TriggerDeleted { workflow_id, .. }
      | DomainEvent::WorkflowPublished { workflow_id, .. }
      | DomainEvent::WorkflowUnpublished { workflow_id, .. } => workflow_id,
    }
  }
}
