use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use operion_types::{ExecutionContext, NodeResult, PORT_ERROR, PORT_SUCCESS};
use reqwest::Client;

use crate::error::NodeError;
use crate::node::{InputRequirements, Node, NodeFactory};
use crate::templating::{render_config, TemplateContext};

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
  attempts: u32,
  delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: 1,
      delay: Duration::from_millis(0),
    }
  }
}

/// Issues an HTTP request built from templated config fields and routes the
/// response to `success` or `error` depending on status code, retrying
/// transient failures per the node's `retry` config.
pub struct HttpRequestFactory {
  client: Client,
}

impl Default for HttpRequestFactory {
  fn default() -> Self {
    Self {
      client: Client::new(),
    }
  }
}

impl NodeFactory for HttpRequestFactory {
  fn id(&self) -> &str {
    "builtin:http_request"
  }

  fn name(&self) -> &str {
    "HTTP Request"
  }

  fn description(&self) -> &str {
    "Performs an HTTP request and routes to success/error by status code."
  }

  fn config_schema(&self) -> serde_json::Value {
    serde_json::json!({
      "type": "object",
      "properties": {
        "method": { "type": "string", "default": "GET" },
        "host": { "type": "string" },
        "path": { "type": "string" },
        "body": {},
        "headers": { "type": "object" },
        "retry": {
          "type": "object",
          "properties": {
            "attempts": { "type": "integer", "minimum": 1 },
            "delay": { "type": "integer", "minimum": 0 }
          }
        }
      },
      "required": ["host", "path"]
    })
  }

  fn create(
    &self,
    node_id: &str,
    config: &HashMap<String, serde_json::Value>,
  ) -> Result<Box<dyn Node>, NodeError> {
    if !config.contains_key("host") || !config.contains_key("path") {
      return Err(NodeError::InvalidConfig {
        node_type: self.id().to_string(),
        message: "missing required fields 'host'/'path'".to_string(),
      });
    }
    let retry = config
      .get("retry")
      .map(|r| RetryPolicy {
        attempts: r
          .get("attempts")
          .and_then(|v| v.as_u64())
          .unwrap_or(1)
          .max(1) as u32,
        delay: Duration::from_millis(r.get("delay").and_then(|v| v.as_u64()).unwrap_or(0)),
      })
      .unwrap_or_default();
    Ok(Box::new(HttpRequestNode {
      node_id: node_id.to_string(),
      config: config.clone(),
      retry,
      client: self.client.clone(),
    }))
  }
}

struct HttpRequestNode {
  node_id: String,
  config: HashMap<String, serde_json::Value>,
  retry: RetryPolicy,
  client: Client,
}

#[async_trait]
impl Node for HttpRequestNode {
  fn input_ports(&self) -> Vec<String> {
    vec!["in".to_string()]
  }

  fn output_ports(&self) -> Vec<String> {
    vec![PORT_SUCCESS.to_string(), PORT_ERROR.to_string()]
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
      &self.config,
      &TemplateContext {
        variables: &ctx.variables,
        node_results: &node_results,
        trigger_data: &ctx.trigger_data,
      },
    )?;

    let method = rendered
      .get("method")
      .and_then(|v| v.as_str())
      .unwrap_or("GET")
      .to_string();
    let host = rendered["host"].as_str().unwrap_or_default();
    let path = rendered["path"].as_str().unwrap_or_default();
    let url = format!("{host}{path}");

    let mut last_outcome = None;
    for attempt in 1..=self.retry.attempts {
      let mut builder = self
        .client
        .request(
          method
            .parse()
            .map_err(|_| NodeError::InvalidConfig {
              node_type: "builtin:http_request".to_string(),
              message: format!("invalid method '{method}'"),
            })?,
          &url,
        );
      if let Some(headers) = rendered.get("headers").and_then(|v| v.as_object()) {
        for (k, v) in headers {
          if let Some(v) = v.as_str() {
            builder = builder.header(k, v);
          }
        }
      }
      if let Some(body) = rendered.get("body") {
        builder = builder.json(body);
      }

      let outcome = match builder.send().await {
        Ok(response) => {
          let status = response.status().as_u16();
          let body: serde_json::Value = response
            .json()
            .await
            .unwrap_or(serde_json::Value::Null);
          Some((status, body))
        }
        Err(_) => None,
      };

      match outcome {
        Some((status, body)) if (200..400).contains(&status) => {
          let mut out = HashMap::new();
          out.insert(
            PORT_SUCCESS.to_string(),
            NodeResult::success(
              self.node_id.clone(),
              serde_json::json!({ "status_code": status, "body": body }),
            ),
          );
          return Ok(out);
        }
        Some((status, body)) => {
          last_outcome = Some(serde_json::json!({ "status_code": status, "body": body }));
        }
        None => {
          last_outcome = Some(serde_json::json!({ "error": "request failed" }));
        }
      }

      if attempt < self.retry.attempts && !self.retry.delay.is_zero() {
        tokio::time::sleep(self.retry.delay).await;
      }
    }

    let mut out = HashMap::new();
    out.insert(
      PORT_ERROR.to_string(),
      NodeResult::error(
        self.node_id.clone(),
        last_outcome.unwrap_or(serde_json::Value::Null),
      ),
    );
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn ctx() -> ExecutionContext {
    ExecutionContext::new(
      "ex-1".to_string(),
      "wf-1".to_string(),
      serde_json::json!({}),
      HashMap::new(),
      chrono::Utc::now(),
    )
  }

  fn config_for(server: &MockServer, attempts: u64) -> HashMap<String, serde_json::Value> {
    HashMap::from([
      ("method".to_string(), serde_json::json!("GET")),
      ("host".to_string(), serde_json::json!(server.uri())),
      ("path".to_string(), serde_json::json!("/thing")),
      (
        "retry".to_string(),
        serde_json::json!({ "attempts": attempts, "delay": 0 }),
      ),
    ])
  }

  #[tokio::test]
  async fn retries_past_transient_failures_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/thing"))
      .respond_with(ResponseTemplate::new(500))
      .up_to_n_times(2)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/thing"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
      .mount(&server)
      .await;

    let factory = HttpRequestFactory::default();
    let node = factory.create("n1", &config_for(&server, 3)).unwrap();
    let out = node.execute(&ctx(), HashMap::new()).await.unwrap();

    let success = out.get(PORT_SUCCESS).expect("success port should fire after recovering");
    assert_eq!(success.data["status_code"], serde_json::json!(200));
    assert!(!out.contains_key(PORT_ERROR));
  }

  #[tokio::test]
  async fn exhausting_retries_routes_to_error_without_reaching_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/thing"))
      .respond_with(ResponseTemplate::new(500))
      .expect(3)
      .mount(&server)
      .await;

    let factory = HttpRequestFactory::default();
    let node = factory.create("n1", &config_for(&server, 3)).unwrap();
    let out = node.execute(&ctx(), HashMap::new()).await.unwrap();

    assert!(!out.contains_key(PORT_SUCCESS));
    let error = out.get(PORT_ERROR).expect("error port should fire once retries are exhausted");
    assert_eq!(error.data["status_code"], serde_json::json!(500));
  }
}
