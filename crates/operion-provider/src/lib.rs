mod manager;
mod provider;

pub use manager::{derive_provider_id, published_trigger_nodes, BatchCounts, ProviderManager};
pub use provider::{EventCallback, Provider, ProviderDeps, TriggerConfig};
