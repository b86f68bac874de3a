use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::Error;
use crate::node::WorkflowNode;

/// Lifecycle status of a workflow. Only one `Published` workflow exists per
/// `workflow_group_id` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
  Draft,
  Published,
  Unpublished,
}

/// A workflow: a directed graph of nodes connected by typed ports, plus
/// metadata and a variables map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub id: String,
  pub workflow_group_id: String,
  pub status: WorkflowStatus,
  pub nodes: Vec<WorkflowNode>,
  pub connections: Vec<Connection>,
  #[serde(default)]
  pub variables: HashMap<String, serde_json::Value>,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub owner: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Set once this draft has been published; points at the immutable
  /// published snapshot's id.
  #[serde(default)]
  pub published_id: Option<String>,
}

impl Workflow {
  pub fn is_published(&self) -> bool {
    matches!(self.status, WorkflowStatus::Published)
  }

  pub fn get_node(&self, node_id: &str) -> Option<&WorkflowNode> {
    self.nodes.iter().find(|n| n.id == node_id)
  }

  pub fn trigger_nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
    self.nodes.iter().filter(|n| n.is_trigger())
  }

  /// Validate node id uniqueness and that every connection resolves.
  pub fn validate(&self) -> Result<(), Error> {
    let mut seen = std::collections::HashSet::new();
    for node in &self.nodes {
      if !seen.insert(node.id.as_str()) {
        return Err(Error::Validation(format!(
          "duplicate node id '{}' in workflow '{}'",
          node.id, self.id
        )));
      }
    }
    for connection in &self.connections {
      connection.validate(&self.nodes)?;
    }
    Ok(())
  }

  /// Create an immutable published snapshot of this (draft) workflow with a
  /// fresh id. Draft mutation after this point does not affect the snapshot.
  pub fn into_published_snapshot(mut self, snapshot_id: impl Into<String>, now: DateTime<Utc>) -> Self {
    self.id = snapshot_id.into();
    self.status = WorkflowStatus::Published;
    self.published_id = None;
    self.updated_at = now;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::NodeCategory;

  fn base_node(id: &str) -> WorkflowNode {
    WorkflowNode {
      id: id.into(),
      node_type: "log".into(),
      category: NodeCategory::Action,
      config: HashMap::new(),
      name: id.into(),
      enabled: true,
      position: None,
      source_id: None,
      provider_id: None,
      event_type: None,
    }
  }

  fn base_workflow() -> Workflow {
    Workflow {
      id: "wf-1".into(),
      workflow_group_id: "grp-1".into(),
      status: WorkflowStatus::Draft,
      nodes: vec![base_node("a"), base_node("b")],
      connections: vec![],
      variables: HashMap::new(),
      name: "wf".into(),
      description: None,
      owner: None,
      created_at: Utc::now(),
      updated_at: Utc::now(),
      published_id: None,
    }
  }

  #[test]
  fn rejects_duplicate_node_ids() {
    let mut wf = base_workflow();
    wf.nodes.push(base_node("a"));
    assert!(wf.validate().is_err());
  }

  #[test]
  fn publishing_assigns_new_id_and_status() {
    let wf = base_workflow();
    let now = Utc::now();
    let published = wf.into_published_snapshot("wf-1-snap", now);
    assert_eq!(published.id, "wf-1-snap");
    assert!(published.is_published());
  }
}
