use std::collections::HashMap;

use async_trait::async_trait;
use operion_types::{ExecutionContext, NodeResult, PORT_SUCCESS};

use crate::error::NodeError;
use crate::node::{InputRequirements, Node, NodeFactory};
use crate::templating::{render_config, TemplateContext};

/// Writes a rendered `message` field to the process log and passes its
/// single input through on `success`. The simplest possible node — useful
/// as a pipeline tap and as the reference implementation new node authors
/// copy from.
pub struct LogFactory;

impl NodeFactory for LogFactory {
  fn id(&self) -> &str {
    "builtin:log"
  }

  fn name(&self) -> &str {
    "Log"
  }

  fn description(&self) -> &str {
    "Logs a templated message and passes its input through."
  }

  fn config_schema(&self) -> serde_json::Value {
    serde_json::json!({
      "type": "object",
      "properties": {
        "message": { "type": "string" },
        "level": { "type": "string", "enum": ["trace", "debug", "info", "warn", "error"] }
      },
      "required": ["message"]
    })
  }

  fn create(
    &self,
    node_id: &str,
    config: &HashMap<String, serde_json::Value>,
  ) -> Result<Box<dyn Node>, NodeError> {
    let message = config
      .get("message")
      .and_then(|v| v.as_str())
      .ok_or_else(|| NodeError::InvalidConfig {
        node_type: self.id().to_string(),
        message: "missing required field 'message'".to_string(),
      })?
      .to_string();
    let level = config
      .get("level")
      .and_then(|v| v.as_str())
      .unwrap_or("info")
      .to_string();
    Ok(Box::new(LogNode {
      node_id: node_id.to_string(),
      message,
      level,
    }))
  }
}

struct LogNode {
  node_id: String,
  message: String,
  level: String,
}

#[async_trait]
impl Node for LogNode {
  fn input_ports(&self) -> Vec<String> {
    vec!["in".to_string()]
  }

  fn output_ports(&self) -> Vec<String> {
    vec![PORT_SUCCESS.to_string()]
  }

  fn input_requirements(&self) -> InputRequirements {
    InputRequirements::any(["in"])
  }

  async fn execute(
    &self,
    ctx: &ExecutionContext,
    inputs: HashMap<String, NodeResult>,
  ) -> Result<HashMap<String, NodeResult>, NodeError> {
    let node_results: HashMap<String, serde_json::Value> = ctx
      .node_results
      .iter()
      .map(|(k, v)| (k.clone(), v.data.clone()))
      .collect();
    let mut config = HashMap::new();
    config.insert("message".to_string(), serde_json::json!(self.message));
    let rendered = render_config(
      &config,
      &TemplateContext {
        variables: &ctx.variables,
        node_results: &node_results,
        trigger_data: &ctx.trigger_data,
      },
    )?;
    let message = rendered["message"].as_str().unwrap_or_default();

    match self.level.as_str() {
      "trace" => tracing::trace!(node_id = %self.node_id, "{message}"),
      "debug" => tracing::debug!(node_id = %self.node_id, "{message}"),
      "warn" => tracing::warn!(node_id = %self.node_id, "{message}"),
      "error" => tracing::error!(node_id = %self.node_id, "{message}"),
      _ => tracing::info!(node_id = %self.node_id, "{message}"),
    }

    let passthrough = inputs
      .into_values()
      .next()
      .map(|r| r.data)
      .unwrap_or(serde_json::Value::Null);
    let mut out = HashMap::new();
    out.insert(
      PORT_SUCCESS.to_string(),
      NodeResult::success(self.node_id.clone(), passthrough),
    );
    Ok(out)
  }
}
