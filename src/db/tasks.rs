//! Task persistence: creation, guarded status transitions, dedup lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::task::validate_transition;
use crate::model::{NewTask, Task, TaskId, TaskStatus, TaskType};
use crate::store::TaskStore;

const TASK_COLUMNS: &str = "id, message_id, task_type, channel_id, status, created_at, started_at, completed_at, error_message, user_id_to_notify";

fn status_names(statuses: &[TaskStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.to_string()).collect()
}

impl super::Db {
    /// Move the task to `status` if its current status is one of `sources`.
    async fn update_guarded(
        &self,
        correlation_id: &str,
        sources: &[TaskStatus],
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>> {
        let now = Utc::now();
        let started_at = (status == TaskStatus::Running).then_some(now);
        let completed_at = status.is_terminal().then_some(now);

        // The status guard makes the transition atomic against concurrent
        // hooks for the same message.
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks
             SET status = $1,
                 started_at = COALESCE($2, started_at),
                 completed_at = COALESCE($3, completed_at),
                 error_message = COALESCE($4, error_message)
             WHERE message_id = $5 AND status = ANY($6)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(started_at)
        .bind(completed_at)
        .bind(error)
        .bind(correlation_id)
        .bind(status_names(sources))
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => row.try_into_task().map(Some),
            None => match self.get_by_correlation_id(correlation_id).await? {
                None => Ok(None),
                Some(current) => Err(Error::InvalidTransition {
                    from: current.status.to_string(),
                    to: status.to_string(),
                }),
            },
        }
    }
}

#[async_trait]
impl TaskStore for super::Db {
    async fn create(&self, new: NewTask) -> Result<Task> {
        let row: TaskRow = sqlx::query_as(&format!(
            "INSERT INTO tasks (message_id, task_type, channel_id, status, user_id_to_notify, created_at)
             VALUES ($1, $2, $3, 'pending', $4, $5)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&new.message_id)
        .bind(new.task_type.as_str())
        .bind(new.channel_id)
        .bind(new.user_id_to_notify)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;
        row.try_into_task()
    }

    async fn update_status(
        &self,
        correlation_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>> {
        self.update_guarded(correlation_id, &TaskStatus::sources(status), status, error)
            .await
    }

    async fn transition_from(
        &self,
        correlation_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>> {
        validate_transition(from, to)?;
        self.update_guarded(correlation_id, &[from], to, error).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(TaskRow::try_into_task).transpose()
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE message_id = $1"
        ))
        .bind(correlation_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(TaskRow::try_into_task).transpose()
    }

    async fn get_by_status(
        &self,
        channel_id: i64,
        task_type: TaskType,
        status: TaskStatus,
    ) -> Result<Option<Task>> {
        self.find_by_statuses(channel_id, task_type, &[status]).await
    }

    async fn find_by_statuses(
        &self,
        channel_id: i64,
        task_type: TaskType,
        statuses: &[TaskStatus],
    ) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE channel_id = $1 AND task_type = $2 AND status = ANY($3)
             ORDER BY array_position($3, status), id
             LIMIT 1"
        ))
        .bind(channel_id)
        .bind(task_type.as_str())
        .bind(status_names(statuses))
        .fetch_optional(self.pool())
        .await?;
        row.map(TaskRow::try_into_task).transpose()
    }

    async fn update_correlation_id(&self, id: TaskId, correlation_id: &str) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET message_id = $1 WHERE id = $2 RETURNING {TASK_COLUMNS}"
        ))
        .bind(correlation_id)
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("task {id}")))?
            .try_into_task()
    }

    async fn list_by_channel(&self, channel_id: i64) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE channel_id = $1 ORDER BY id"
        ))
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn list_by_status(&self, status: TaskStatus, limit: i64) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = $1 ORDER BY id DESC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    message_id: String,
    task_type: String,
    channel_id: i64,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    user_id_to_notify: Option<i64>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        Ok(Task {
            id: TaskId(self.id),
            message_id: self.message_id,
            channel_id: self.channel_id,
            task_type: self.task_type.parse()?,
            status: self.status.parse()?,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_message: self.error_message,
            user_id_to_notify: self.user_id_to_notify,
        })
    }
}
