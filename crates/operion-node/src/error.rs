use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
  #[error("unknown node type: {0}")]
  UnknownType(String),

  #[error("invalid config for node type '{node_type}': {message}")]
  InvalidConfig { node_type: String, message: String },

  #[error("template resolution failed for field '{field}': {message}")]
  Template { field: String, message: String },

  #[error("node execution failed: {0}")]
  Execution(String),
}

impl From<NodeError> for operion_types::Error {
  fn from(value: NodeError) -> Self {
    match value {
      NodeError::UnknownType(_) | NodeError::InvalidConfig { .. } | NodeError::Template { .. } => {
        operion_types::Error::Validation(value.to_string())
      }
      NodeError::Execution(_) => operion_types::Error::NodeExecution(value.to_string()),
    }
  }
}
