use async_trait::async_trait;
use audiobot_domain::{JobConfig, JobType, TaskStatus, TaskStatusRecord, TaskStatusStore};
use audiobot_errors::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};

pub struct SqliteTaskStatusStore {
    pool: SqlitePool,
}

impl SqliteTaskStatusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 设置作业是否启用
    pub async fn set_job_active(&self, job_type: JobType, is_active: bool) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO job_configs (job_type, is_active) VALUES (?, ?) \
             ON CONFLICT(job_type) DO UPDATE SET is_active = excluded.is_active",
        )
        .bind(job_type.as_str())
        .bind(is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> SchedulerResult<TaskStatusRecord> {
        let status: String = row.try_get("status")?;
        Ok(TaskStatusRecord {
            key: row.try_get("key")?,
            task_type: row.try_get("task_type")?,
            fingerprint: row.try_get("fingerprint")?,
            status: status.parse().map_err(SchedulerError::DatabaseOperation)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskStatusStore for SqliteTaskStatusStore {
    #[instrument(skip(self, record), fields(key = %record.key, task_type = %record.task_type))]
    async fn create_task_status(&self, record: &TaskStatusRecord) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO task_status (key, task_type, fingerprint, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.key)
        .bind(&record.task_type)
        .bind(&record.fingerprint)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Created task status record: {}", record.key);
        Ok(())
    }

    async fn get_active_task_status(
        &self,
        task_type: &str,
        fingerprint: Option<&str>,
    ) -> SchedulerResult<Option<TaskStatusRecord>> {
        let row = sqlx::query(
            "SELECT * FROM task_status \
             WHERE task_type = ? AND fingerprint IS ? AND status IN ('QUEUED', 'IN_WORKER') \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(task_type)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_task_status_by_key(&self, key: &str) -> SchedulerResult<Option<TaskStatusRecord>> {
        let row = sqlx::query("SELECT * FROM task_status WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    #[instrument(skip(self))]
    async fn update_task_status(&self, key: &str, status: TaskStatus) -> SchedulerResult<bool> {
        let Some(current) = self.get_task_status_by_key(key).await? else {
            return Ok(false);
        };

        if !current.status.can_transition_to(status) {
            warn!(
                "忽略非法的状态转换: {} {} -> {}",
                key, current.status, status
            );
            return Ok(true);
        }

        // 以旧状态为条件更新，并发写入时只有一个转换生效
        let result = sqlx::query(
            "UPDATE task_status SET status = ?, updated_at = ? WHERE key = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(key)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("任务状态已被并发修改: {}", key);
        }
        Ok(true)
    }

    async fn get_job_config(&self, job_type: JobType) -> SchedulerResult<Option<JobConfig>> {
        let row = sqlx::query("SELECT is_active, last_run_at FROM job_configs WHERE job_type = ?")
            .bind(job_type.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok::<_, SchedulerError>(JobConfig {
                job_type,
                is_active: row.try_get("is_active")?,
                last_run_at: row.try_get("last_run_at")?,
            })
        })
        .transpose()
    }

    async fn update_job_last_run(
        &self,
        job_type: JobType,
        last_run_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT last_run_at FROM job_configs WHERE job_type = ?")
            .bind(job_type.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let current: Option<DateTime<Utc>> = match row {
            Some(row) => row.try_get("last_run_at")?,
            None => None,
        };
        if current.is_some_and(|current| current >= last_run_at) {
            debug!("忽略回退的作业水位线: {} {}", job_type, last_run_at);
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO job_configs (job_type, is_active, last_run_at) VALUES (?, 1, ?) \
             ON CONFLICT(job_type) DO UPDATE SET last_run_at = excluded.last_run_at",
        )
        .bind(job_type.as_str())
        .bind(last_run_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
