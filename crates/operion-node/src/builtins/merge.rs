use std::collections::HashMap;

use async_trait::async_trait;
use operion_types::{ExecutionContext, NodeResult, WaitMode, PORT_SUCCESS};

use crate::error::NodeError;
use crate::node::{InputRequirements, Node, NodeFactory};

/// Waits on a configured set of named input ports and combines everything
/// that arrived into one object keyed by port name. The reference join
/// node: `wait_mode: "all"` blocks until every configured port has a value
/// for this `node_execution_id` (§9 "Loops"), `wait_mode: "any"` fires on
/// the first.
pub struct MergeFactory;

impl NodeFactory for MergeFactory {
  fn id(&self) -> &str {
    "builtin:merge"
  }

  fn name(&self) -> &str {
    "Merge"
  }

  fn description(&self) -> &str {
    "Combines values from multiple input ports into one object."
  }

  fn config_schema(&self) -> serde_json::Value {
    serde_json::json!({
      "type": "object",
      "properties": {
        "ports": { "type": "array", "items": { "type": "string" } },
        "wait_mode": { "type": "string", "enum": ["all", "any"] }
      },
      "required": ["ports"]
    })
  }

  fn create(
    &self,
    node_id: &str,
    config: &HashMap<String, serde_json::Value>,
  ) -> Result<Box<dyn Node>, NodeError> {
    let ports: Vec<String> = config
      .get("ports")
      .and_then(|v| v.as_array())
      .ok_or_else(|| NodeError::InvalidConfig {
        node_type: self.id().to_string(),
        message: "missing required field 'ports'".to_string(),
      })?
      .iter()
      .filter_map(|v| v.as_str().map(str::to_string))
      .collect();
    if ports.is_empty() {
      return Err(NodeError::InvalidConfig {
        node_type: self.id().to_string(),
        message: "'ports' must be non-empty".to_string(),
      });
    }
    let wait_mode = match config.get("wait_mode").and_then(|v| v.as_str()) {
      Some("any") => WaitMode::Any,
      _ => WaitMode::All,
    };
    Ok(Box::new(MergeNode {
      node_id: node_id.to_string(),
      ports,
      wait_mode,
    }))
  }
}

struct MergeNode {
  node_id: String,
  ports: Vec<String>,
  wait_mode: WaitMode,
}

#[async_trait]
impl Node for MergeNode {
  fn input_ports(&self) -> Vec<String> {
    self.ports.clone()
  }

  fn output_ports(&self) -> Vec<String> {
    vec![PORT_SUCCESS.to_string()]
  }

  fn input_requirements(&self) -> InputRequirements {
    InputRequirements {
      required_ports: self.ports.clone(),
      optional_ports: Vec::new(),
      wait_mode: self.wait_mode,
      timeout: None,
    }
  }

  async fn execute(
    &self,
    _ctx: &ExecutionContext,
    inputs: HashMap<String, NodeResult>,
  ) -> Result<HashMap<String, NodeResult>, NodeError> {
    let merged: serde_json::Map<String, serde_json::Value> = inputs
      .into_iter()
      .map(|(port, result)| (port, result.data))
      .collect();
    let mut out = HashMap::new();
    out.insert(
      PORT_SUCCESS.to_string(),
      NodeResult::success(self.node_id.clone(), serde_json::Value::Object(merged)),
    );
    Ok(out)
  }
}
