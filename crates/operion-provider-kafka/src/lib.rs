mod provider;

pub use provider::KafkaProvider;
