use std::collections::HashMap;

use async_trait::async_trait;
use operion_types::{ExecutionContext, NodeResult, PORT_SUCCESS};

use crate::error::NodeError;
use crate::node::{InputRequirements, Node, NodeFactory};
use crate::templating::{render_config, TemplateContext};

/// Builds a new JSON object from a templated `fields` map, the general
/// shape-reshaping node every workflow chain leans on between calls whose
/// input/output shapes don't already line up.
pub struct TransformFactory;

impl NodeFactory for TransformFactory {
  fn id(&self) -> &str {
    "builtin:transform"
  }

  fn name(&self) -> &str {
    "Transform"
  }

  fn description(&self) -> &str {
    "Builds a JSON object from templated fields."
  }

  fn config_schema(&self) -> serde_json::Value {
    serde_json::json!({
      "type": "object",
      "properties": {
        "fields": { "type": "object" }
      },
      "required": ["fields"]
    })
  }

  fn create(
    &self,
    node_id: &str,
    config: &HashMap<String, serde_json::Value>,
  ) -> Result<Box<dyn Node>, NodeError> {
    let fields = config
      .get("fields")
      .and_then(|v| v.as_object())
      .ok_or_else(|| NodeError::InvalidConfig {
        node_type: self.id().to_string(),
        message: "missing required field 'fields'".to_string(),
      })?
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    Ok(Box::new(TransformNode {
      node_id: node_id.to_string(),
      fields,
    }))
  }
}

struct TransformNode {
  node_id: String,
  fields: HashMap<String, serde_json::Value>,
}

#[async_trait]
impl Node for TransformNode {
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
    _inputs: HashMap<String, NodeResult>,
  ) -> Result<HashMap<String, NodeResult>, NodeError> {
    let node_results: HashMap<String, serde_json::Value> = ctx
      .node_results
      .iter()
      .map(|(k, v)| (k.clone(), v.data.clone()))
      .collect();
    let rendered = render_config(
      &self.fields,
      &TemplateContext {
        variables: &ctx.variables,
        node_results: &node_results,
        trigger_data: &ctx.trigger_data,
      },
    )?;
    let data = serde_json::Value::Object(rendered.into_iter().collect());
    let mut out = HashMap::new();
    out.insert(
      PORT_SUCCESS.to_string(),
      NodeResult::success(self.node_id.clone(), data),
    );
    Ok(out)
  }
}
