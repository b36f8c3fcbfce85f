//! Task and step persistence
//!
//! A step row is created `running` before the model is queried and written
//! once more when the step ends. A row that reached `completed` is never
//! rewritten.

use anyhow::{Context, Result};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Running,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            _ => TaskStatus::Created,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => StepStatus::Completed,
            _ => StepStatus::Running,
        }
    }
}

/// Task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub input: String,
    pub additional_input: Option<serde_json::Value>,
    pub status: TaskStatus,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// One iteration of the agent loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub task_id: String,
    /// 1-based, monotonic per task
    pub index: i64,
    pub input: Option<String>,
    pub additional_input: Option<serde_json::Value>,
    pub status: StepStatus,
    /// Speakable summary from the model
    pub output: Option<String>,
    /// Set only when the finish ability ran
    pub is_last: bool,
    pub created_at: i64,
}

impl Step {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

fn now_secs() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}

fn json_column(row: &SqliteRow, column: &str) -> Option<serde_json::Value> {
    row.get::<Option<String>, _>(column)
        .and_then(|text| serde_json::from_str(&text).ok())
}

fn task_from_row(row: &SqliteRow) -> Task {
    Task {
        id: row.get("id"),
        input: row.get("input"),
        additional_input: json_column(row, "additional_input"),
        status: TaskStatus::parse(&row.get::<String, _>("status")),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    }
}

fn step_from_row(row: &SqliteRow) -> Step {
    Step {
        task_id: row.get("task_id"),
        index: row.get("step_index"),
        input: row.get("input"),
        additional_input: json_column(row, "additional_input"),
        status: StepStatus::parse(&row.get::<String, _>("status")),
        output: row.get("output"),
        is_last: row.get::<i64, _>("is_last") != 0,
        created_at: row.get("created_at"),
    }
}

pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_task(
        &self,
        id: &str,
        input: &str,
        additional_input: Option<&serde_json::Value>,
    ) -> Result<Task> {
        let now = now_secs()?;
        let additional = additional_input.map(|v| v.to_string());

        sqlx::query(
            "INSERT INTO tasks (id, input, additional_input, status, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(input)
        .bind(&additional)
        .bind(TaskStatus::Created.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create task")?;

        Ok(Task {
            id: id.to_string(),
            input: input.to_string(),
            additional_input: additional_input.cloned(),
            status: TaskStatus::Created,
            created_at: now,
            completed_at: None,
        })
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT id, input, additional_input, status, created_at, completed_at FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch task")?;

        Ok(row.as_ref().map(task_from_row))
    }

    /// Most recent tasks first
    pub async fn get_recent_tasks(&self, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT id, input, additional_input, status, created_at, completed_at FROM tasks ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent tasks")?;

        Ok(rows.iter().map(task_from_row).collect())
    }

    /// Insert the next step of a task with status `running`.
    ///
    /// # Errors
    /// `EngineError::TaskNotFound` when the task does not exist.
    pub async fn create_step(
        &self,
        task_id: &str,
        input: Option<&str>,
        additional_input: Option<&serde_json::Value>,
    ) -> Result<Step> {
        let now = now_secs()?;
        let additional = additional_input.map(|v| v.to_string());

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to look up task")?;
        if exists.is_none() {
            return Err(EngineError::TaskNotFound(task_id.to_string()).into());
        }

        let index: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(step_index), 0) + 1 FROM steps WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to compute step index")?;

        sqlx::query(
            "INSERT INTO steps (task_id, step_index, input, additional_input, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(index)
        .bind(input)
        .bind(&additional)
        .bind(StepStatus::Running.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create step")?;

        sqlx::query("UPDATE tasks SET status = ? WHERE id = ? AND status = ?")
            .bind(TaskStatus::Running.as_str())
            .bind(task_id)
            .bind(TaskStatus::Created.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to mark task running")?;

        tx.commit().await.context("Failed to commit step")?;

        Ok(Step {
            task_id: task_id.to_string(),
            index,
            input: input.map(str::to_string),
            additional_input: additional_input.cloned(),
            status: StepStatus::Running,
            output: None,
            is_last: false,
            created_at: now,
        })
    }

    /// Persist the end state of a step.
    ///
    /// Returns `false` when the stored row was already completed and was
    /// left untouched. A last step marks its task completed.
    pub async fn finish_step(&self, step: &Step) -> Result<bool> {
        let now = now_secs()?;
        let completed_at = step.is_completed().then_some(now);

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let updated = sqlx::query(
            "UPDATE steps SET status = ?, output = ?, is_last = ?, completed_at = ? WHERE task_id = ? AND step_index = ? AND status != ?",
        )
        .bind(step.status.as_str())
        .bind(&step.output)
        .bind(step.is_last as i64)
        .bind(completed_at)
        .bind(&step.task_id)
        .bind(step.index)
        .bind(StepStatus::Completed.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to update step")?
        .rows_affected();

        if updated > 0 && step.is_last {
            sqlx::query("UPDATE tasks SET status = ?, completed_at = ? WHERE id = ?")
                .bind(TaskStatus::Completed.as_str())
                .bind(now)
                .bind(&step.task_id)
                .execute(&mut *tx)
                .await
                .context("Failed to complete task")?;
        }

        tx.commit().await.context("Failed to commit step")?;

        Ok(updated > 0)
    }

    /// Steps of a task in index order
    pub async fn get_steps(&self, task_id: &str) -> Result<Vec<Step>> {
        let rows = sqlx::query(
            "SELECT task_id, step_index, input, additional_input, status, output, is_last, created_at FROM steps WHERE task_id = ? ORDER BY step_index ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch steps")?;

        Ok(rows.iter().map(step_from_row).collect())
    }
}
