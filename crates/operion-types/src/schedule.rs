use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduler-provider-private record: one row per bound trigger, keyed by
/// `source_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
  pub id: String,
  pub source_id: String,
  pub cron_expression: String,
  pub next_due_at: DateTime<Utc>,
  pub active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
