//! Config templating.
//!
//! Node `config` string fields may reference `{{.variables.x}}`,
//! `{{.node_results.prev.field}}`, `{{.trigger_data.y}}` and
//! `{{.env.NAME}}` (§4.4 "Templating"). Rendering happens here, inside the
//! node implementation's boundary, not the engine — the engine only
//! provides the [`TemplateContext`] view. The recursive-resolve-then
//! pure-template-reparse approach mirrors minijinja's own `{{ field }}`
//! syntax, adapted to this crate's `{{.namespace.field}}` syntax.

use std::collections::HashMap;

use minijinja::{Environment, Value};
use serde_json::json;

use crate::error::NodeError;

/// The view the engine provides to templated config resolution.
pub struct TemplateContext<'a> {
  pub variables: &'a HashMap<String, serde_json::Value>,
  pub node_results: &'a HashMap<String, serde_json::Value>,
  pub trigger_data: &'a serde_json::Value,
}

impl<'a> TemplateContext<'a> {
  fn to_minijinja_value(&self) -> Value {
    Value::from_serialize(&json!({
      "variables": self.variables,
      "node_results": self.node_results,
      "trigger_data": self.trigger_data,
      "env": std::env::vars().collect::<HashMap<_, _>>(),
    }))
  }
}

/// Render every templated string field of `config`, recursively, against
/// `ctx`. Non-string values pass through unchanged; a string that is a
/// *pure* template (the whole field is one `{{ ... }}` expression) re-parses
/// the rendered text as JSON so e.g. `"{{.variables.count}}"` resolves to a
/// number rather than its string form.
pub fn render_config(
  config: &HashMap<String, serde_json::Value>,
  ctx: &TemplateContext,
) -> Result<HashMap<String, serde_json::Value>, NodeError> {
  let env = Environment::new();
  let context = ctx.to_minijinja_value();

  let mut rendered = HashMap::with_capacity(config.len());
  for (key, value) in config {
    rendered.insert(key.clone(), render_value(&env, key, value, &context)?);
  }
  Ok(rendered)
}

fn render_value(
  env: &Environment,
  field: &str,
  value: &serde_json::Value,
  context: &Value,
) -> Result<serde_json::Value, NodeError> {
  match value {
    serde_json::Value::String(s) => {
      if !s.contains("{{") && !s.contains("{%") {
        return Ok(value.clone());
      }
      let template = dot_prefixed_to_minijinja(s);
      let rendered = env
        .render_str(&template, context.clone())
        .map_err(|e| NodeError::Template {
          field: field.to_string(),
          message: e.to_string(),
        })?;
      if is_pure_template(s)
        && let Ok(parsed) = serde_json::from_str(&rendered)
      {
        return Ok(parsed);
      }
      Ok(serde_json::Value::String(rendered))
    }
    serde_json::Value::Array(items) => {
      let rendered: Result<Vec<_>, _> = items
        .iter()
        .map(|item| render_value(env, field, item, context))
        .collect();
      Ok(serde_json::Value::Array(rendered?))
    }
    serde_json::Value::Object(obj) => {
      let mut rendered = serde_json::Map::with_capacity(obj.len());
      for (k, v) in obj {
        rendered.insert(k.clone(), render_value(env, field, v, context)?);
      }
      Ok(serde_json::Value::Object(rendered))
    }
    other => Ok(other.clone()),
  }
}

/// Translate `{{.namespace.path}}` (our dotted-root syntax) into plain
/// minijinja `{{ namespace.path }}`.
fn dot_prefixed_to_minijinja(s: &str) -> String {
  s.replace("{{.", "{{ ").replace(".}}", " }}")
}

fn is_pure_template(s: &str) -> bool {
  let trimmed = s.trim();
  trimmed.starts_with("{{")
    && trimmed.ends_with("}}")
    && trimmed.matches("{{").count() == 1
    && trimmed.matches("}}").count() == 1
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ctx<'a>(
    variables: &'a HashMap<String, serde_json::Value>,
    node_results: &'a HashMap<String, serde_json::Value>,
    trigger_data: &'a serde_json::Value,
  ) -> TemplateContext<'a> {
    TemplateContext {
      variables,
      node_results,
      trigger_data,
    }
  }

  #[test]
  fn renders_variable_reference() {
    let mut variables = HashMap::new();
    variables.insert("greeting".to_string(), json!("hi"));
    let node_results = HashMap::new();
    let trigger_data = json!({});
    let context = ctx(&variables, &node_results, &trigger_data);

    let mut config = HashMap::new();
    config.insert("message".to_string(), json!("{{.variables.greeting}}"));

    let rendered = render_config(&config, &context).unwrap();
    assert_eq!(rendered["message"], json!("hi"));
  }

  #[test]
  fn pure_template_reparses_as_number() {
    let variables = HashMap::new();
    let mut node_results = HashMap::new();
    node_results.insert("prev".to_string(), json!({ "count": 3 }));
    let trigger_data = json!({});
    let context = ctx(&variables, &node_results, &trigger_data);

    let mut config = HashMap::new();
    config.insert(
      "count".to_string(),
      json!("{{.node_results.prev.count}}"),
    );

    let rendered = render_config(&config, &context).unwrap();
    assert_eq!(rendered["count"], json!(3));
  }

  #[test]
  fn non_template_strings_pass_through() {
    let variables = HashMap::new();
    let node_results = HashMap::new();
    let trigger_data = json!({});
    let context = ctx(&variables, &node_results, &trigger_data);

    let mut config = HashMap::new();
    config.insert("literal".to_string(), json!("just text"));

    let rendered = render_config(&config, &context).unwrap();
    assert_eq!(rendered["literal"], json!("just text"));
  }

  #[test]
  fn trigger_data_namespace_resolves() {
    let variables = HashMap::new();
    let node_results = HashMap::new();
    let trigger_data = json!({ "y": "payload" });
    let context = ctx(&variables, &node_results, &trigger_data);

    let mut config = HashMap::new();
    config.insert("value".to_string(), json!("got {{.trigger_data.y}}"));

    let rendered = render_config(&config, &context).unwrap();
    assert_eq!(rendered["value"], json!("got payload"));
  }
}
