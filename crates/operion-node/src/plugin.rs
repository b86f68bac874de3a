//! The loadable-plugin channel (§4.5's second discovery channel).
//!
//! Node types may also be backed by a WASM component resolved from a
//! directory registry laid out `{root}/{name}--{version}/{manifest.json,
//! component.wasm}`. Because the `.wit` world this host would normally be
//! bound against isn't available, we talk to the component through a
//! minimal direct ABI instead of generated bindings: one exported
//! function, `execute`, taking and returning a component-model `string`
//! carrying JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use operion_types::{ExecutionContext, NodeResult, PORT_ERROR, PORT_SUCCESS};
use tokio::fs;
use wasmtime::component::{Component, Linker, Val};
use wasmtime::{Engine, Store};

use crate::error::NodeError;
use crate::node::{InputRequirements, Node, NodeFactory};

/// Metadata describing an installed plugin component.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PluginManifest {
  /// Plugin name, e.g. "my-org/sentiment-analysis".
  pub name: String,
  pub version: String,
  pub description: String,
  /// The `provider:type` this plugin registers as. Defaults to `name` if absent.
  #[serde(default)]
  pub node_type: Option<String>,
  #[serde(default)]
  pub input_ports: Vec<String>,
  #[serde(default)]
  pub output_ports: Vec<String>,
  pub input_schema: serde_json::Value,
}

impl PluginManifest {
  pub fn dir_name(&self) -> String {
    format!("{}--{}", self.name.replace('/', "--"), self.version)
  }

  pub fn node_type(&self) -> String {
    self
      .node_type
      .clone()
      .unwrap_or_else(|| self.name.clone())
  }
}

pub struct InstalledPlugin {
  pub manifest: PluginManifest,
  pub wasm_path: PathBuf,
}

/// Scans a directory of installed components at startup and produces one
/// [`NodeFactory`] per discovered plugin.
pub struct PluginDirectory {
  root: PathBuf,
  engine: Engine,
}

impl PluginDirectory {
  pub fn new(root: impl Into<PathBuf>) -> Result<Self, NodeError> {
    let mut config = wasmtime::Config::new();
    config.wasm_component_model(true);
    config.async_support(true);
    let engine = Engine::new(&config).map_err(|e| NodeError::Execution(e.to_string()))?;
    Ok(Self {
      root: root.into(),
      engine,
    })
  }

  async fn read_manifest(dir: &Path) -> Result<PluginManifest, NodeError> {
    let path = dir.join("manifest.json");
    let content = fs::read_to_string(&path)
      .await
      .map_err(|e| NodeError::Execution(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&content).map_err(|e| NodeError::Execution(e.to_string()))
  }

  /// Scan `root` and return every installed plugin found there. A directory
  /// whose name doesn't end in `manifest.json` + `component.wasm` is skipped.
  pub async fn scan(&self) -> Result<Vec<InstalledPlugin>, NodeError> {
    let mut found = Vec::new();
    if !self.root.exists() {
      return Ok(found);
    }
    let mut entries = fs::read_dir(&self.root)
      .await
      .map_err(|e| NodeError::Execution(e.to_string()))?;
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|e| NodeError::Execution(e.to_string()))?
    {
      let path = entry.path();
      if !path.is_dir() {
        continue;
      }
      let wasm_path = path.join("component.wasm");
      if !wasm_path.exists() {
        continue;
      }
      let manifest = Self::read_manifest(&path).await?;
      found.push(InstalledPlugin { manifest, wasm_path });
    }
    Ok(found)
  }

  /// Build a [`NodeFactory`] for one installed plugin, precompiling its
  /// component so `create()` is cheap at registration time.
  pub fn factory_for(&self, plugin: InstalledPlugin) -> Result<PluginFactory, NodeError> {
    let bytes = std::fs::read(&plugin.wasm_path)
      .map_err(|e| NodeError::Execution(format!("reading {}: {e}", plugin.wasm_path.display())))?;
    let component = Component::new(&self.engine, &bytes)
      .map_err(|e| NodeError::Execution(format!("invalid component: {e}")))?;
    Ok(PluginFactory {
      node_type: plugin.manifest.node_type(),
      manifest: plugin.manifest,
      engine: self.engine.clone(),
      component,
    })
  }
}

/// A [`NodeFactory`] backed by a precompiled WASM component.
pub struct PluginFactory {
  node_type: String,
  manifest: PluginManifest,
  engine: Engine,
  component: Component,
}

impl NodeFactory for PluginFactory {
  fn id(&self) -> &str {
    &self.node_type
  }

  fn name(&self) -> &str {
    &self.manifest.name
  }

  fn description(&self) -> &str {
    &self.manifest.description
  }

  fn config_schema(&self) -> serde_json::Value {
    self.manifest.input_schema.clone()
  }

  fn create(
    &self,
    node_id: &str,
    config: &HashMap<String, serde_json::Value>,
  ) -> Result<Box<dyn Node>, NodeError> {
    Ok(Box::new(PluginNode {
      node_id: node_id.to_string(),
      config: config.clone(),
      manifest: self.manifest.clone(),
      engine: self.engine.clone(),
      component: self.component.clone(),
    }))
  }
}

struct PluginNode {
  node_id: String,
  config: HashMap<String, serde_json::Value>,
  manifest: PluginManifest,
  engine: Engine,
  component: Component,
}

#[async_trait]
impl Node for PluginNode {
  fn input_ports(&self) -> Vec<String> {
    if self.manifest.input_ports.is_empty() {
      vec!["in".to_string()]
    } else {
      self.manifest.input_ports.clone()
    }
  }

  fn output_ports(&self) -> Vec<String> {
    if self.manifest.output_ports.is_empty() {
      vec![PORT_SUCCESS.to_string(), PORT_ERROR.to_string()]
    } else {
      self.manifest.output_ports.clone()
    }
  }

  fn input_requirements(&self) -> InputRequirements {
    InputRequirements::any(self.input_ports())
  }

  async fn execute(
    &self,
    ctx: &ExecutionContext,
    inputs: HashMap<String, NodeResult>,
  ) -> Result<HashMap<String, NodeResult>, NodeError> {
    let payload = serde_json::json!({
      "node_id": self.node_id,
      "config": self.config,
      "inputs": inputs.into_iter().map(|(k, v)| (k, v.data)).collect::<HashMap<_, _>>(),
      "trigger_data": ctx.trigger_data,
      "variables": ctx.variables,
    })
    .to_string();

    let mut store = Store::new(&self.engine, ());
    let linker = Linker::new(&self.engine);
    let instance = linker
      .instantiate_async(&mut store, &self.component)
      .await
      .map_err(|e| NodeError::Execution(format!("instantiating plugin: {e}")))?;
    let func = instance
      .get_func(&mut store, "execute")
      .ok_or_else(|| NodeError::Execution("plugin does not export 'execute'".to_string()))?;

    let params = [Val::String(payload)];
    let mut results = [Val::String(String::new())];
    func
      .call_async(&mut store, &params, &mut results)
      .await
      .map_err(|e| NodeError::Execution(format!("calling plugin: {e}")))?;
    func
      .post_return_async(&mut store)
      .await
      .map_err(|e| NodeError::Execution(format!("plugin post-return: {e}")))?;

    let Val::String(raw) = &results[0] else {
      return Err(NodeError::Execution(
        "plugin 'execute' did not return a string".to_string(),
      ));
    };
    let parsed: HashMap<String, serde_json::Value> =
      serde_json::from_str(raw).map_err(|e| NodeError::Execution(e.to_string()))?;

    let mut out = HashMap::new();
    for (port, data) in parsed {
      let status = if port == PORT_ERROR {
        NodeResult::error(self.node_id.clone(), data)
      } else {
        NodeResult::success(self.node_id.clone(), data)
      };
      out.insert(port, status);
    }
    Ok(out)
  }
}
