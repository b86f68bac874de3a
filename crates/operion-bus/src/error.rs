use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
  #[error("transient transport failure: {0}")]
  Transport(String),

  #[error("failed to encode/decode message: {0}")]
  Codec(String),
}

impl From<BusError> for operion_types::Error {
  fn from(value: BusError) -> Self {
    operion_types::Error::TransientTransport(value.to_string())
  }
}
