pub mod builtins;
pub mod error;
pub mod node;
pub mod plugin;
pub mod registry;
pub mod templating;

pub use error::NodeError;
pub use node::{InputRequirements, Node, NodeFactory};
pub use plugin::{InstalledPlugin, PluginDirectory, PluginFactory, PluginManifest};
pub use registry::NodeRegistry;
pub use templating::{render_config, TemplateContext};
