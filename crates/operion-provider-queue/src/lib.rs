mod provider;

pub use provider::QueueProvider;
