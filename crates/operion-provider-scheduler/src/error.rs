use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
  #[error("invalid schedule expression '{expression}': {reason}")]
  Invalid { expression: String, reason: String },
}

impl From<SchedulerError> for operion_types::Error {
  fn from(value: SchedulerError) -> Self {
    operion_types::Error::Validation(value.to_string())
  }
}
