use thiserror::Error;

/// The error taxonomy shared by every core subsystem.
///
/// Callers distinguish failure modes by matching on [`Error::kind`], never by
/// message substring — this is the contract persistence implementations and
/// bus transports are held to (see the persistence collaborator contract).
#[derive(Debug, Error)]
pub enum Error {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("validation failed: {0}")]
  Validation(String),

  #[error("provider not running: {0}")]
  ProviderNotRunning(String),

  #[error("provider does not support this lifecycle operation: {0}")]
  ProviderLifecycleUnsupported(String),

  #[error("transient transport failure: {0}")]
  TransientTransport(String),

  #[error("node execution failed: {0}")]
  NodeExecution(String),

  #[error("input coordination timed out: {0}")]
  InputTimeout(String),

  #[error("fatal error: {0}")]
  Fatal(String),
}

/// The taxonomy kind, independent of the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NotFound,
  Validation,
  ProviderNotRunning,
  ProviderLifecycleUnsupported,
  TransientTransport,
  NodeExecution,
  InputTimeout,
  Fatal,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::NotFound(_) => ErrorKind::NotFound,
      Error::Validation(_) => ErrorKind::Validation,
      Error::ProviderNotRunning(_) => ErrorKind::ProviderNotRunning,
      Error::ProviderLifecycleUnsupported(_) => ErrorKind::ProviderLifecycleUnsupported,
      Error::TransientTransport(_) => ErrorKind::TransientTransport,
      Error::NodeExecution(_) => ErrorKind::NodeExecution,
      Error::InputTimeout(_) => ErrorKind::InputTimeout,
      Error::Fatal(_) => ErrorKind::Fatal,
    }
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self.kind(), ErrorKind::TransientTransport)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
