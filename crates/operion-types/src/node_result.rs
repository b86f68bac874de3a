use serde::{Deserialize, Serialize};

/// The outcome of executing one node once within one execution.
///
/// The *port* that produced the result is recorded on the edge carrying it
/// (a [`crate::Connection`]'s `source_port`), not on the result itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
  pub node_id: String,
  #[serde(default)]
  pub data: serde_json::Value,
  pub status: NodeResultStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResultStatus {
  Success,
  Error,
  Skipped,
}

impl NodeResult {
  pub fn success(node_id: impl Into<String>, data: serde_json::Value) -> Self {
    Self {
      node_id: node_id.into(),
      data,
      status: NodeResultStatus::Success,
    }
  }

  pub fn error(node_id: impl Into<String>, data: serde_json::Value) -> Self {
    Self {
      node_id: node_id.into(),
      data,
      status: NodeResultStatus::Error,
    }
  }
}
