use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid value for {name}: {message}")]
  Invalid { name: String, message: String },
}
