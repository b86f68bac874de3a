use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Whether a node is matched by the Activator (`Trigger`) or executed by the
/// Worker (`Action`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
  Trigger,
  Action,
}

/// A node within a workflow graph.
///
/// `node_type` is a free string such as `"log"`, `"http_request"`,
/// `"transform"`, or `"trigger:scheduler"` — the provider id for trigger
/// nodes is derived from this by splitting on `':'` (§4.1 event routing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
  pub id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  pub category: NodeCategory,
  #[serde(default)]
  pub config: HashMap<String, serde_json::Value>,
  pub name: String,
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default)]
  pub position: Option<(f64, f64)>,

  /// Trigger-only: the source id assigned by the owning provider once bound.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_id: Option<String>,
  /// Trigger-only: the provider id extracted from `node_type`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider_id: Option<String>,
  /// Trigger-only: the event type this trigger matches; `None` matches any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub event_type: Option<String>,
}

fn default_true() -> bool {
  true
}

impl WorkflowNode {
  pub fn is_trigger(&self) -> bool {
    matches!(self.category, NodeCategory::Trigger)
  }

  /// Provider id derived from `node_type` by splitting on `':'`; falls back
  /// to the full type string when there is no separator (§4.1).
  pub fn derive_provider_id(&self) -> &str {
    self
      .node_type
      .split_once(':')
      .map(|(provider, _)| provider)
      .unwrap_or(self.node_type.as_str())
  }

  /// A bound trigger has a non-empty `source_id` matching a live source at
  /// its provider; an unbound one has none and no configured source.
  pub fn is_bound(&self) -> bool {
    self
      .source_id
      .as_ref()
      .is_some_and(|id| !id.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn node(node_type: &str) -> WorkflowNode {
    WorkflowNode {
      id: "n1".into(),
      node_type: node_type.into(),
      category: NodeCategory::Trigger,
      config: HashMap::new(),
      name: "n1".into(),
      enabled: true,
      position: None,
      source_id: None,
      provider_id: None,
      event_type: None,
    }
  }

  #[test]
  fn derives_provider_from_prefix() {
    assert_eq!(node("trigger:scheduler").derive_provider_id(), "scheduler");
  }

  #[test]
  fn falls_back_to_full_type_without_separator() {
    assert_eq!(node("log").derive_provider_id(), "log");
  }

  #[test]
  fn bound_requires_non_empty_source_id() {
    let mut n = node("trigger:webhook");
    assert!(!n.is_bound());
    n.source_id = Some("".into());
    assert!(!n.is_bound());
    n.source_id = Some("src-1".into());
    assert!(n.is_bound());
  }
}
