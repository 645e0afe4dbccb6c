//! 任务层读写的库存储实体
//!
//! 只包含任务需要的属性：状态、时间戳、偏移量和有效性标记。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub key: String,
    pub chat_id: i64,
    pub username: Option<String>,
    pub title: Option<String>,
    pub is_valid: bool,
    /// 已索引的最大消息ID，索引任务从这里继续
    pub last_message_offset_id: i64,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

impl ChatRecord {
    pub fn new(key: impl Into<String>, chat_id: i64) -> Self {
        Self {
            key: key.into(),
            chat_id,
            username: None,
            title: None,
            is_valid: true,
            last_message_offset_id: 0,
            last_indexed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsernameRecord {
    pub key: String,
    pub username: String,
    pub is_valid: bool,
    pub is_checked: bool,
    /// 检查后解析出的频道
    pub chat_key: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl UsernameRecord {
    pub fn unchecked(key: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            username: username.into(),
            is_valid: true,
            is_checked: false,
            chat_key: None,
            checked_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRecord {
    pub key: String,
    pub chat_id: i64,
    pub message_id: i64,
    pub file_id: String,
    pub file_unique_id: String,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub duration: Option<u32>,
    pub is_document: bool,
    /// 归档频道中副本的消息ID
    pub archived_message_id: Option<i64>,
}

/// 从源音频指向归档副本的边
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedAudio {
    pub source_audio_key: String,
    pub archive_chat_id: i64,
    pub archive_message_id: i64,
}

/// 某段时间内单个音频的交互次数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionCount {
    pub audio_key: String,
    pub count: u64,
}
