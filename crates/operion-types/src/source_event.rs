use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Wire envelope published by a provider onto the source-event bus and
/// consumed by the Activator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
  pub source_id: String,
  pub provider_id: String,
  pub event_type: String,
  #[serde(default)]
  pub event_data: serde_json::Value,
  pub occurred_at: DateTime<Utc>,
}

impl SourceEvent {
  pub fn validate(&self) -> Result<(), Error> {
    if self.source_id.is_empty() {
      return Err(Error::Validation("source event missing source_id".into()));
    }
    if self.provider_id.is_empty() {
      return Err(Error::Validation("source event missing provider_id".into()));
    }
    if self.event_type.is_empty() {
      return Err(Error::Validation("source event missing event_type".into()));
    }
    Ok(())
  }
}
