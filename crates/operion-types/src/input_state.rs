use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node_result::NodeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
  All,
  Any,
}

/// Per-`node_execution_id` coordination record for a multi-input node.
///
/// Keyed by `node_execution_id`, not `(node_id, execution_id)`, so that a
/// node revisited on a loop back-edge gets a fresh state each time (§9);
/// `findPending` on the repository returns the oldest pending state for a
/// `(node_id, execution_id)` pair to preserve FIFO iteration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInputState {
  pub node_execution_id: String,
  pub node_id: String,
  pub execution_id: String,
  /// Results received so far, in arrival order by port name.
  pub arrived: HashMap<String, NodeResult>,
  pub required_ports: Vec<String>,
  pub wait_mode: WaitMode,
  #[serde(default)]
  pub timeout_deadline: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

impl NodeInputState {
  pub fn new(
    node_execution_id: impl Into<String>,
    node_id: impl Into<String>,
    execution_id: impl Into<String>,
    required_ports: Vec<String>,
    wait_mode: WaitMode,
    timeout_deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      node_execution_id: node_execution_id.into(),
      node_id: node_id.into(),
      execution_id: execution_id.into(),
      arrived: HashMap::new(),
      required_ports,
      wait_mode,
      timeout_deadline,
      created_at: now,
    }
  }

  /// Merge a newly-arrived port result into the state.
  pub fn merge(&mut self, port_name: impl Into<String>, result: NodeResult) {
    self.arrived.insert(port_name.into(), result);
  }

  /// Evaluate readiness per `wait_mode`: `All` requires every required port
  /// present; `Any` requires at least one arrival.
  pub fn is_ready(&self) -> bool {
    match self.wait_mode {
      WaitMode::All => self
        .required_ports
        .iter()
        .all(|p| self.arrived.contains_key(p)),
      WaitMode::Any => !self.arrived.is_empty(),
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
    self
      .timeout_deadline
      .map(|deadline| now >= deadline)
      .unwrap_or_else(|| now - self.created_at >= max_age)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node_result::NodeResult;
  use serde_json::json;

  fn state(wait_mode: WaitMode, required: &[&str]) -> NodeInputState {
    NodeInputState::new(
      "ne-1",
      "merge",
      "ex-1",
      required.iter().map(|s| s.to_string()).collect(),
      wait_mode,
      None,
      Utc::now(),
    )
  }

  #[test]
  fn all_mode_requires_every_required_port() {
    let mut s = state(WaitMode::All, &["a", "b"]);
    assert!(!s.is_ready());
    s.merge("a", NodeResult::success("x", json!({})));
    assert!(!s.is_ready());
    s.merge("b", NodeResult::success("y", json!({})));
    assert!(s.is_ready());
  }

  #[test]
  fn any_mode_ready_on_first_arrival() {
    let mut s = state(WaitMode::Any, &["a", "b"]);
    assert!(!s.is_ready());
    s.merge("a", NodeResult::success("x", json!({})));
    assert!(s.is_ready());
  }

  #[test]
  fn extra_arrivals_beyond_required_do_not_block_all_mode() {
    let mut s = state(WaitMode::All, &["a"]);
    s.merge("a", NodeResult::success("x", json!({})));
    s.merge("extra", NodeResult::success("z", json!({})));
    assert!(s.is_ready());
  }
}
