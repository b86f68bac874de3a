mod provider;
mod server;

pub use provider::WebhookProvider;
pub use server::{shared, WebhookServer};
