use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node_result::NodeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
    )
  }
}

/// The mutable state of one workflow run.
///
/// `node_results` is append-only within one run: once a node completes, its
/// entry is never rewritten in place (it may only be replaced by a later
/// execution of the *same* node on a back-edge loop, per §9, which is still
/// an insert under the same key — the prior value is the "last write" that
/// is read by downstream nodes, not silently discarded history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
  pub execution_id: String,
  pub published_workflow_id: String,
  pub trigger_data: serde_json::Value,
  pub variables: HashMap<String, serde_json::Value>,
  pub node_results: HashMap<String, NodeResult>,
  #[serde(default)]
  pub metadata: HashMap<String, serde_json::Value>,
  pub status: ExecutionStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl ExecutionContext {
  pub fn new(
    execution_id: impl Into<String>,
    published_workflow_id: impl Into<String>,
    trigger_data: serde_json::Value,
    variables: HashMap<String, serde_json::Value>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      published_workflow_id: published_workflow_id.into(),
      trigger_data,
      variables,
      node_results: HashMap::new(),
      metadata: HashMap::new(),
      status: ExecutionStatus::Pending,
      created_at: now,
      updated_at: now,
    }
  }

  /// Record a node's result. Append-only in spirit: an existing entry for
  /// the same node is only ever replaced by a strictly later execution of
  /// that node (loop re-entry), never concurrently rewritten.
  pub fn record_result(&mut self, result: NodeResult, now: DateTime<Utc>) {
    self.node_results.insert(result.node_id.clone(), result);
    self.updated_at = now;
  }

  pub fn transition(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
    self.status = status;
    self.updated_at = now;
  }
}
