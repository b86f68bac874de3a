use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::node::WorkflowNode;
use crate::port::PortRef;

/// A directed edge `source_port -> target_port`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
  pub source_port: PortRef,
  pub target_port: PortRef,
}

impl Connection {
  pub fn new(source_port: PortRef, target_port: PortRef) -> Self {
    Self {
      source_port,
      target_port,
    }
  }

  /// Validate that both endpoints name real nodes and that the connection is
  /// not a self-loop across the same port pair.
  pub fn validate(&self, nodes: &[WorkflowNode]) -> Result<(), Error> {
    if self.source_port == self.target_port {
      return Err(Error::Validation(format!(
        "connection is a self-loop across the same port pair: {}",
        self.source_port
      )));
    }
    let has_node = |id: &str| nodes.iter().any(|n| n.id == id);
    if !has_node(&self.source_port.node_id) {
      return Err(Error::Validation(format!(
        "connection references unknown source node: {}",
        self.source_port.node_id
      )));
    }
    if !has_node(&self.target_port.node_id) {
      return Err(Error::Validation(format!(
        "connection references unknown target node: {}",
        self.target_port.node_id
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::NodeCategory;
  use std::collections::HashMap;

  fn node(id: &str) -> WorkflowNode {
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

  #[test]
  fn rejects_self_loop_same_port_pair() {
    let c = Connection::new(
      PortRef::new("a", "success"),
      PortRef::new("a", "success"),
    );
    assert!(c.validate(&[node("a")]).is_err());
  }

  #[test]
  fn accepts_loop_via_different_ports() {
    let c = Connection::new(PortRef::new("a", "success"), PortRef::new("a", "retry"));
    assert!(c.validate(&[node("a")]).is_ok());
  }

  #[test]
  fn rejects_unknown_endpoints() {
    let c = Connection::new(PortRef::new("a", "success"), PortRef::new("b", "in"));
    assert!(c.validate(&[node("a")]).is_err());
  }
}
