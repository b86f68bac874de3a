//! A sqlite-backed implementation of the repository contract, built on
//! `sqlx`: workflows and executions are stored as JSON blobs keyed by id
//! (§6.5 — "no foreign keys are required across service boundaries;
//! referential integrity is logical and enforced by the core"), with
//! pool-level concurrency handled by sqlx.

use async_trait::async_trait;
use operion_types::{
  Error, ExecutionContext, ExecutionStatus, NodeInputState, Schedule, Workflow, WorkflowNode,
  WorkflowStatus,
};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::traits::{
  ExecutionContextRepository, InputCoordinationRepository, ListOptions, ListPage, NodeRepository,
  Result, ScheduleRepository, TriggerMatch, WorkflowRepository,
};

pub struct SqliteRepositories {
  pool: SqlitePool,
}

impl SqliteRepositories {
  pub async fn connect(url: &str) -> std::result::Result<Self, sqlx::Error> {
    let pool = SqlitePool::connect(url).await?;
    let repo = Self { pool };
    repo.migrate().await?;
    Ok(repo)
  }

  async fn migrate(&self) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
      "CREATE TABLE IF NOT EXISTS workflows (
         id TEXT PRIMARY KEY,
         workflow_group_id TEXT NOT NULL,
         status TEXT NOT NULL,
         body TEXT NOT NULL
       )",
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      "CREATE TABLE IF NOT EXISTS executions (
         execution_id TEXT PRIMARY KEY,
         published_workflow_id TEXT NOT NULL,
         status TEXT NOT NULL,
         body TEXT NOT NULL
       )",
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      "CREATE TABLE IF NOT EXISTS input_states (
         node_execution_id TEXT PRIMARY KEY,
         node_id TEXT NOT NULL,
         execution_id TEXT NOT NULL,
         created_at TEXT NOT NULL,
         body TEXT NOT NULL
       )",
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      "CREATE TABLE IF NOT EXISTS schedules (
         source_id TEXT PRIMARY KEY,
         next_due_at TEXT NOT NULL,
         active INTEGER NOT NULL,
         body TEXT NOT NULL
       )",
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  fn map_sqlx_err(err: sqlx::Error, what: &str) -> Error {
    match err {
      sqlx::Error::RowNotFound => Error::NotFound(what.to_string()),
      other => Error::TransientTransport(other.to_string()),
    }
  }
}

fn status_tag(status: WorkflowStatus) -> &'static str {
  match status {
    WorkflowStatus::Draft => "draft",
    WorkflowStatus::Published => "published",
    WorkflowStatus::Unpublished => "unpublished",
  }
}

#[async_trait]
impl WorkflowRepository for SqliteRepositories {
  async fn list(&self, options: ListOptions) -> Result<ListPage<Workflow>> {
    let rows = if let Some(status) = options.status {
      sqlx::query("SELECT body FROM workflows WHERE status = ? ORDER BY id")
        .bind(status_tag(status))
        .fetch_all(&self.pool)
        .await
    } else {
      sqlx::query("SELECT body FROM workflows ORDER BY id")
        .fetch_all(&self.pool)
        .await
    }
    .map_err(|e| Self::map_sqlx_err(e, "workflows"))?;

    let mut items: Vec<Workflow> = rows
      .into_iter()
      .filter_map(|row| {
        let body: String = row.try_get("body").ok()?;
        serde_json::from_str(&body).ok()
      })
      .collect();

    let total = items.len();
    let limit = if options.limit == 0 { total } else { options.limit };
    let has_next = items.len() > limit;
    items.truncate(limit);
    Ok(ListPage {
      items,
      total,
      has_next,
    })
  }

  async fn get_by_id(&self, id: &str) -> Result<Workflow> {
    let row = sqlx::query("SELECT body FROM workflows WHERE id = ?")
      .bind(id)
      .fetch_optional(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, id))?
      .ok_or_else(|| Error::NotFound(format!("workflow '{}'", id)))?;
    let body: String = row.try_get("body").map_err(|e| Self::map_sqlx_err(e, id))?;
    serde_json::from_str(&body).map_err(|e| Error::Validation(e.to_string()))
  }

  async fn save(&self, workflow: &Workflow) -> Result<()> {
    let body = serde_json::to_string(workflow).map_err(|e| Error::Validation(e.to_string()))?;
    sqlx::query(
      "INSERT INTO workflows (id, workflow_group_id, status, body) VALUES (?, ?, ?, ?)
       ON CONFLICT(id) DO UPDATE SET workflow_group_id = excluded.workflow_group_id,
         status = excluded.status, body = excluded.body",
    )
    .bind(&workflow.id)
    .bind(&workflow.workflow_group_id)
    .bind(status_tag(workflow.status))
    .bind(body)
    .execute(&self.pool)
    .await
    .map_err(|e| Self::map_sqlx_err(e, &workflow.id))?;
    Ok(())
  }

  async fn find_trigger_nodes_by(
    &self,
    source_id: &str,
    event_type: &str,
    provider_id: &str,
  ) -> Result<Vec<TriggerMatch>> {
    let published = self.list(ListOptions {
      status: Some(WorkflowStatus::Published),
      limit: 0,
      after: None,
    }).await?;

    let mut matches = Vec::new();
    for workflow in published.items {
      for node in workflow.trigger_nodes() {
        if node.source_id.as_deref() != Some(source_id) {
          continue;
        }
        if node.provider_id.as_deref() != Some(provider_id) {
          continue;
        }
        let event_matches = node.event_type.as_deref().map(|t| t == event_type).unwrap_or(true);
        if event_matches {
          matches.push(TriggerMatch {
            workflow_id: workflow.id.clone(),
            node: node.clone(),
          });
        }
      }
    }
    Ok(matches)
  }
}

#[async_trait]
impl NodeRepository for SqliteRepositories {
  async fn get_nodes_from_published(&self, published_workflow_id: &str) -> Result<Vec<WorkflowNode>> {
    Ok(WorkflowRepository::get_by_id(self, published_workflow_id).await?.nodes)
  }

  async fn save_node(&self, workflow_id: &str, node: &WorkflowNode) -> Result<()> {
    let mut workflow = WorkflowRepository::get_by_id(self, workflow_id).await?;
    workflow.nodes.push(node.clone());
    WorkflowRepository::save(self, &workflow).await
  }

  async fn update_node(&self, workflow_id: &str, node: &WorkflowNode) -> Result<()> {
    let mut workflow = WorkflowRepository::get_by_id(self, workflow_id).await?;
    match workflow.nodes.iter_mut().find(|n| n.id == node.id) {
      Some(existing) => *existing = node.clone(),
      None => return Err(Error::NotFound(format!("node '{}'", node.id))),
    }
    WorkflowRepository::save(self, &workflow).await
  }

  async fn find_trigger_nodes_by(
    &self,
    source_id: &str,
    event_type: &str,
    provider_id: &str,
  ) -> Result<Vec<TriggerMatch>> {
    WorkflowRepository::find_trigger_nodes_by(self, source_id, event_type, provider_id).await
  }
}

fn execution_status_tag(status: ExecutionStatus) -> &'static str {
  match status {
    ExecutionStatus::Pending => "pending",
    ExecutionStatus::Running => "running",
    ExecutionStatus::Completed => "completed",
    ExecutionStatus::Failed => "failed",
    ExecutionStatus::Cancelled => "cancelled",
  }
}

#[async_trait]
impl ExecutionContextRepository for SqliteRepositories {
  async fn save(&self, context: &ExecutionContext) -> Result<()> {
    self.update(context).await
  }

  async fn load(&self, execution_id: &str) -> Result<ExecutionContext> {
    let row = sqlx::query("SELECT body FROM executions WHERE execution_id = ?")
      .bind(execution_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, execution_id))?
      .ok_or_else(|| Error::NotFound(format!("execution '{}'", execution_id)))?;
    let body: String = row.try_get("body").map_err(|e| Self::map_sqlx_err(e, execution_id))?;
    serde_json::from_str(&body).map_err(|e| Error::Validation(e.to_string()))
  }

  async fn update(&self, context: &ExecutionContext) -> Result<()> {
    let body = serde_json::to_string(context).map_err(|e| Error::Validation(e.to_string()))?;
    sqlx::query(
      "INSERT INTO executions (execution_id, published_workflow_id, status, body) VALUES (?, ?, ?, ?)
       ON CONFLICT(execution_id) DO UPDATE SET status = excluded.status, body = excluded.body",
    )
    .bind(&context.execution_id)
    .bind(&context.published_workflow_id)
    .bind(execution_status_tag(context.status))
    .bind(body)
    .execute(&self.pool)
    .await
    .map_err(|e| Self::map_sqlx_err(e, &context.execution_id))?;
    Ok(())
  }

  async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionContext>> {
    let rows = sqlx::query("SELECT body FROM executions WHERE status = ?")
      .bind(execution_status_tag(status))
      .fetch_all(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, "executions"))?;
    Ok(rows
      .into_iter()
      .filter_map(|row| {
        let body: String = row.try_get("body").ok()?;
        serde_json::from_str(&body).ok()
      })
      .collect())
  }

  async fn list_by_workflow(&self, published_workflow_id: &str) -> Result<Vec<ExecutionContext>> {
    let rows = sqlx::query("SELECT body FROM executions WHERE published_workflow_id = ?")
      .bind(published_workflow_id)
      .fetch_all(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, "executions"))?;
    Ok(rows
      .into_iter()
      .filter_map(|row| {
        let body: String = row.try_get("body").ok()?;
        serde_json::from_str(&body).ok()
      })
      .collect())
  }
}

#[async_trait]
impl InputCoordinationRepository for SqliteRepositories {
  async fn save_input_state(&self, state: &NodeInputState) -> Result<()> {
    let body = serde_json::to_string(state).map_err(|e| Error::Validation(e.to_string()))?;
    sqlx::query(
      "INSERT INTO input_states (node_execution_id, node_id, execution_id, created_at, body)
       VALUES (?, ?, ?, ?, ?)
       ON CONFLICT(node_execution_id) DO UPDATE SET body = excluded.body",
    )
    .bind(&state.node_execution_id)
    .bind(&state.node_id)
    .bind(&state.execution_id)
    .bind(state.created_at.to_rfc3339())
    .bind(body)
    .execute(&self.pool)
    .await
    .map_err(|e| Self::map_sqlx_err(e, &state.node_execution_id))?;
    Ok(())
  }

  async fn load_input_state(&self, node_execution_id: &str) -> Result<NodeInputState> {
    let row = sqlx::query("SELECT body FROM input_states WHERE node_execution_id = ?")
      .bind(node_execution_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, node_execution_id))?
      .ok_or_else(|| Error::NotFound(format!("input state '{}'", node_execution_id)))?;
    let body: String = row.try_get("body").map_err(|e| Self::map_sqlx_err(e, node_execution_id))?;
    serde_json::from_str(&body).map_err(|e| Error::Validation(e.to_string()))
  }

  async fn find_pending(&self, node_id: &str, execution_id: &str) -> Result<Option<NodeInputState>> {
    let row = sqlx::query(
      "SELECT body FROM input_states WHERE node_id = ? AND execution_id = ?
       ORDER BY created_at ASC LIMIT 1",
    )
    .bind(node_id)
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(|e| Self::map_sqlx_err(e, node_id))?;
    match row {
      Some(row) => {
        let body: String = row.try_get("body").map_err(|e| Self::map_sqlx_err(e, node_id))?;
        Ok(Some(
          serde_json::from_str(&body).map_err(|e| Error::Validation(e.to_string()))?,
        ))
      }
      None => Ok(None),
    }
  }

  async fn delete(&self, node_execution_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM input_states WHERE node_execution_id = ?")
      .bind(node_execution_id)
      .execute(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, node_execution_id))?;
    Ok(())
  }

  async fn cleanup_expired(&self, max_age: chrono::Duration) -> Result<Vec<String>> {
    let cutoff = (chrono::Utc::now() - max_age).to_rfc3339();
    let rows = sqlx::query("SELECT node_execution_id FROM input_states WHERE created_at < ?")
      .bind(&cutoff)
      .fetch_all(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, "input_states"))?;
    let ids: Vec<String> = rows
      .into_iter()
      .filter_map(|row| row.try_get("node_execution_id").ok())
      .collect();
    sqlx::query("DELETE FROM input_states WHERE created_at < ?")
      .bind(&cutoff)
      .execute(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, "input_states"))?;
    Ok(ids)
  }
}

#[async_trait]
impl ScheduleRepository for SqliteRepositories {
  async fn upsert(&self, schedule: &Schedule) -> Result<()> {
    let body = serde_json::to_string(schedule).map_err(|e| Error::Validation(e.to_string()))?;
    sqlx::query(
      "INSERT INTO schedules (source_id, next_due_at, active, body) VALUES (?, ?, ?, ?)
       ON CONFLICT(source_id) DO UPDATE SET next_due_at = excluded.next_due_at,
         active = excluded.active, body = excluded.body",
    )
    .bind(&schedule.source_id)
    .bind(schedule.next_due_at.to_rfc3339())
    .bind(schedule.active as i64)
    .bind(body)
    .execute(&self.pool)
    .await
    .map_err(|e| Self::map_sqlx_err(e, &schedule.source_id))?;
    Ok(())
  }

  async fn get_by_source_id(&self, source_id: &str) -> Result<Option<Schedule>> {
    let row = sqlx::query("SELECT body FROM schedules WHERE source_id = ?")
      .bind(source_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, source_id))?;
    match row {
      Some(row) => {
        let body: String = row.try_get("body").map_err(|e| Self::map_sqlx_err(e, source_id))?;
        Ok(Some(
          serde_json::from_str(&body).map_err(|e| Error::Validation(e.to_string()))?,
        ))
      }
      None => Ok(None),
    }
  }

  async fn due(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Schedule>> {
    let rows = sqlx::query(
      "SELECT body FROM schedules WHERE active = 1 AND next_due_at <= ? ORDER BY next_due_at ASC, source_id ASC",
    )
    .bind(now.to_rfc3339())
    .fetch_all(&self.pool)
    .await
    .map_err(|e| Self::map_sqlx_err(e, "schedules"))?;
    Ok(rows
      .into_iter()
      .filter_map(|row| {
        let body: String = row.try_get("body").ok()?;
        serde_json::from_str(&body).ok()
      })
      .collect())
  }

  async fn remove(&self, source_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM schedules WHERE source_id = ?")
      .bind(source_id)
      .execute(&self.pool)
      .await
      .map_err(|e| Self::map_sqlx_err(e, source_id))?;
    Ok(())
  }
}
