use serde::{Deserialize, Serialize};

/// A `node.execute` work item. The engine dereferences `execution_id`
/// through persistence to recover the full [`crate::ExecutionContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExecuteItem {
  pub execution_id: String,
  pub node_id: String,
}

impl NodeExecuteItem {
  pub fn new(execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
    Self {
      execution_id: execution_id.into(),
      node_id: node_id.into(),
    }
  }
}
