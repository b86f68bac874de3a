use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use operion_types::{ExecutionContext, NodeResult, WaitMode};

use crate::error::NodeError;

/// What a node needs before it can run (§4.4 step 3).
#[derive(Debug, Clone)]
pub struct InputRequirements {
  pub required_ports: Vec<String>,
  pub optional_ports: Vec<String>,
  pub wait_mode: WaitMode,
  pub timeout: Option<Duration>,
}

impl InputRequirements {
  /// No upstream requirements: a trigger-seeded or zero-input node.
  pub fn none() -> Self {
    Self {
      required_ports: Vec::new(),
      optional_ports: Vec::new(),
      wait_mode: WaitMode::All,
      timeout: None,
    }
  }

  pub fn all(ports: impl IntoIterator<Item = impl Into<String>>) -> Self {
    Self {
      required_ports: ports.into_iter().map(Into::into).collect(),
      optional_ports: Vec::new(),
      wait_mode: WaitMode::All,
      timeout: None,
    }
  }

  pub fn any(ports: impl IntoIterator<Item = impl Into<String>>) -> Self {
    Self {
      required_ports: ports.into_iter().map(Into::into).collect(),
      optional_ports: Vec::new(),
      wait_mode: WaitMode::Any,
      timeout: None,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// A constructed, ready-to-run node.
#[async_trait]
pub trait Node: Send + Sync {
  fn input_ports(&self) -> Vec<String>;
  fn output_ports(&self) -> Vec<String>;
  fn input_requirements(&self) -> InputRequirements;

  /// Execute with the given execution context and collected inputs (keyed
  /// by this node's own input port name — the connection's *target* port).
  /// Returns a map `output_port -> NodeResult` — exactly the returned ports
  /// are considered fired (§4.4 step 4).
  async fn execute(
    &self,
    ctx: &ExecutionContext,
    inputs: HashMap<String, NodeResult>,
  ) -> Result<HashMap<String, NodeResult>, NodeError>;
}

/// Constructs [`Node`] instances of one `type`, keyed by the registry.
pub trait NodeFactory: Send + Sync {
  fn id(&self) -> &str;
  fn name(&self) -> &str;
  fn description(&self) -> &str;
  fn config_schema(&self) -> serde_json::Value;
  fn create(
    &self,
    node_id: &str,
    config: &HashMap<String, serde_json::Value>,
  ) -> Result<Box<dyn Node>, NodeError>;
}
