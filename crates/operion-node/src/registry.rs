use std::collections::HashMap;
use std::sync::Arc;

use crate::error::NodeError;
use crate::node::{Node, NodeFactory};

/// Lookup table of node factories keyed by `provider:type` (§3.2 derivation).
///
/// Built-ins are registered at process start; the loadable-plugin channel
/// (component registry scan) adds to the same table at startup as well, so
/// callers never need to distinguish "built-in" from "loaded" nodes.
#[derive(Default, Clone)]
pub struct NodeRegistry {
  factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, factory: impl NodeFactory + 'static) {
    self.factories.insert(factory.id().to_string(), Arc::new(factory));
  }

  pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeFactory>> {
    self.factories.get(node_type).cloned()
  }

  pub fn create(
    &self,
    node_type: &str,
    node_id: &str,
    config: &HashMap<String, serde_json::Value>,
  ) -> Result<Box<dyn Node>, NodeError> {
    let factory = self
      .get(node_type)
      .ok_or_else(|| NodeError::UnknownType(node_type.to_string()))?;
    factory.create(node_id, config)
  }

  pub fn ids(&self) -> Vec<String> {
    self.factories.keys().cloned().collect()
  }

  /// A registry pre-loaded with the reference built-ins (§4.5).
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register(crate::builtins::log::LogFactory);
    registry.register(crate::builtins::http_request::HttpRequestFactory::default());
    registry.register(crate::builtins::transform::TransformFactory);
    registry.register(crate::builtins::merge::MergeFactory);
    registry
  }
}
