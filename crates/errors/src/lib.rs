use thiserror::Error;

#[cfg(test)]
mod tests;

/// Telegram客户端错误
///
/// 由Telegram客户端实现返回，任务根据具体类型决定标记失败、等待或更新存储。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TelegramError {
    #[error("用户名未被占用: {0}")]
    UsernameNotOccupied(String),
    #[error("无效的用户名: {0}")]
    UsernameInvalid(String),
    #[error("触发限流，需要等待 {seconds} 秒")]
    FloodWait { seconds: u64 },
    #[error("无效的频道: {0}")]
    ChannelInvalid(String),
    #[error("该会话禁止转发消息: {0}")]
    ChatForwardsRestricted(String),
    #[error("当前客户端不支持该操作: {0}")]
    Unsupported(String),
    #[error("Telegram RPC错误: {0}")]
    Rpc(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务状态记录未找到: {key}")]
    TaskStatusNotFound { key: String },
    #[error("实体未找到: {entity} {key}")]
    EntityNotFound { entity: String, key: String },
    #[error("无效的投递目标: {0}")]
    InvalidDestination(String),
    #[error("无效的触发器: {expr} - {message}")]
    InvalidTrigger { expr: String, message: String },
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("消息发布失败，已重试 {attempts} 次: {message}")]
    TransportFailure { attempts: u32, message: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("Telegram错误: {0}")]
    Telegram(#[from] TelegramError),
    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
    #[error("资源不足: {0}")]
    ResourceExhausted(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_status_not_found<S: Into<String>>(key: S) -> Self {
        Self::TaskStatusNotFound { key: key.into() }
    }
    pub fn entity_not_found<E: Into<String>, K: Into<String>>(entity: E, key: K) -> Self {
        Self::EntityNotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }
    pub fn invalid_destination<S: Into<String>>(msg: S) -> Self {
        Self::InvalidDestination(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 若错误来自Telegram限流，返回服务端要求的等待秒数
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            SchedulerError::Telegram(TelegramError::FloodWait { seconds }) => Some(*seconds),
            _ => None,
        }
    }

    /// 参数缺失或引用实体无法解析，属于终止性错误，不会自动重试
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidTaskParams(_) | SchedulerError::EntityNotFound { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Internal(_)
                | SchedulerError::Configuration(_)
                | SchedulerError::ResourceExhausted(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::DatabaseOperation(_) | SchedulerError::MessageQueue(_)
        )
    }

    /// 面向最终用户的提示，不暴露内部失败原因
    pub fn user_message(&self) -> &str {
        match self {
            SchedulerError::InvalidTaskParams(_) | SchedulerError::EntityNotFound { .. } => {
                "请求的内容不存在或参数有误"
            }
            SchedulerError::ResourceExhausted(_) => "系统资源不足，请稍后重试",
            _ => "发生内部错误，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}
