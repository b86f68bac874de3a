use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use operion_provider::{EventCallback, Provider, ProviderDeps, TriggerConfig};
use operion_repository::ScheduleRepository;
use operion_types::{Error, Schedule};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::expression::next_due_at;

const PROVIDER_ID: &str = "scheduler";
const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Centralized provider: one instance covers every `trigger:scheduler`
/// binding across all workflows (§4.2).
pub struct SchedulerProvider {
  repo: Arc<dyn ScheduleRepository>,
  cancellation: RwLock<Option<CancellationToken>>,
}

impl SchedulerProvider {
  pub fn new(repo: Arc<dyn ScheduleRepository>) -> Self {
    Self {
      repo,
      cancellation: RwLock::new(None),
    }
  }
}

#[async_trait]
impl Provider for SchedulerProvider {
  fn id(&self) -> &str {
    PROVIDER_ID
  }

  async fn initialize(&self, deps: ProviderDeps) -> Result<(), Error> {
    *self.cancellation.write().await = Some(deps.cancellation);
    Ok(())
  }

  async fn prepare(&self) -> Result<(), Error> {
    Ok(())
  }

  async fn configure_trigger(&self, config: TriggerConfig) -> Result<String, Error> {
    let cron_expression = config
      .config
      .get("cron_expression")
      .and_then(|v| v.as_str())
      .ok_or_else(|| Error::Validation("scheduler trigger missing cron_expression".to_string()))?
      .to_string();

    let now = Utc::now();
    let due_at = next_due_at(&cron_expression, now).map_err(Error::from)?;

    let source_id = format!("sched-{}", config.trigger_id);
    let existing = self.repo.get_by_source_id(&source_id).await?;
    let schedule = Schedule {
      id: existing.as_ref().map(|s| s.id.clone()).unwrap_or_else(|| source_id.clone()),
      source_id: source_id.clone(),
      cron_expression,
      next_due_at: due_at,
      active: true,
      created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
      updated_at: now,
    };
    self.repo.upsert(&schedule).await?;
    Ok(source_id)
  }

  async fn remove_trigger(&self, _trigger_id: &str, source_id: &str) -> Result<(), Error> {
    match self.repo.remove(source_id).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == operion_types::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e),
    }
  }

  async fn start(&self, callback: EventCallback) -> Result<(), Error> {
    let cancellation = self
      .cancellation
      .read()
      .await
      .clone()
      .ok_or_else(|| Error::Fatal("scheduler provider started before initialize".to_string()))?;

    loop {
      tokio::select! {
        _ = cancellation.cancelled() => return Ok(()),
        _ = tokio::time::sleep(POLL_INTERVAL) => {}
      }

      let now = Utc::now();
      let mut due = match self.repo.due(now).await {
        Ok(due) => due,
        Err(error) => {
          tracing::warn!(%error, "scheduler: failed to query due schedules");
          continue;
        }
      };
      due.sort_by(|a, b| a.next_due_at.cmp(&b.next_due_at).then_with(|| a.source_id.cmp(&b.source_id)));

      for schedule in due {
        let data = serde_json::json!({
          "cron_expression": schedule.cron_expression,
          "due_at": schedule.next_due_at,
          "published_at": now,
        });
        let emitted = callback(
          schedule.source_id.clone(),
          PROVIDER_ID.to_string(),
          "ScheduleDue".to_string(),
          data,
        )
        .await;
        if emitted.is_err() {
          tracing::warn!(source_id = %schedule.source_id, "scheduler: event emission failed, not advancing");
          continue;
        }

        let next = match next_due_at(&schedule.cron_expression, now) {
          Ok(next) => next,
          Err(error) => {
            tracing::error!(source_id = %schedule.source_id, %error, "scheduler: failed to recompute next_due_at");
            continue;
          }
        };
        let mut updated = schedule;
        updated.next_due_at = next;
        updated.updated_at = now;
        if let Err(error) = self.repo.upsert(&updated).await {
          tracing::warn!(source_id = %updated.source_id, %error, "scheduler: failed to persist next_due_at, not advancing");
        }
      }
    }
  }

  async fn stop(&self) -> Result<(), Error> {
    Ok(())
  }

  async fn validate(&self) -> Result<(), Error> {
    Ok(())
  }
}
