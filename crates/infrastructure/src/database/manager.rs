use audiobot_config::DatabaseConfig;
use audiobot_domain::JobType;
use audiobot_errors::SchedulerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::sqlite::{SqliteLibraryStore, SqliteTaskStatusStore};

const SCHEMA: &str = include_str!("schema.sql");

/// SQLite数据库管理器，负责连接池、建表和存储实例的创建
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        debug!("Connecting to SQLite database: {}", config.url);

        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        let manager = Self { pool };
        manager.run_migrations().await?;
        info!("数据库初始化完成");
        Ok(manager)
    }

    /// 单连接的内存数据库，每个连接池一份独立数据
    pub async fn in_memory() -> SchedulerResult<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?;

        let manager = Self { pool };
        manager.run_migrations().await?;
        Ok(manager)
    }

    /// 建表并为每种作业写入默认配置
    async fn run_migrations(&self) -> SchedulerResult<()> {
        debug!("Running SQLite database migrations");

        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        for job_type in [
            JobType::CountInteractions,
            JobType::ForwardAudios,
            JobType::CheckUsernames,
            JobType::IndexChannels,
        ] {
            sqlx::query("INSERT OR IGNORE INTO job_configs (job_type, is_active) VALUES (?, 1)")
                .bind(job_type.as_str())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn task_status_store(&self) -> SqliteTaskStatusStore {
        SqliteTaskStatusStore::new(self.pool.clone())
    }

    pub fn library_store(&self) -> SqliteLibraryStore {
        SqliteLibraryStore::new(self.pool.clone())
    }
}
