//! Telegram客户端抽象
//!
//! 具体实现可以是用户账号或机器人账号，机器人账号不能读取历史消息，
//! 也不能转发受保护的内容。

use async_trait::async_trait;
use audiobot_errors::TelegramError;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub type TelegramResult<T> = Result<T, TelegramError>;

/// 会话标识：数字ID或公开用户名
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatIdentifier {
    Id(i64),
    Username(String),
}

impl std::fmt::Display for ChatIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatIdentifier::Id(id) => write!(f, "{id}"),
            ChatIdentifier::Username(username) => write!(f, "@{username}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TgChat {
    pub id: i64,
    pub kind: ChatKind,
    pub username: Option<String>,
    pub title: Option<String>,
    pub has_protected_content: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TgAudio {
    pub file_id: String,
    pub file_unique_id: String,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub duration: Option<u32>,
    /// 作为文档而非音频发送的音频文件
    pub is_document: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TgMessage {
    pub id: i64,
    pub chat_id: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub audio: Option<TgAudio>,
    pub has_protected_content: bool,
}

impl TgMessage {
    /// 消息正文或说明文字
    pub fn content(&self) -> Option<&str> {
        self.caption.as_deref().or(self.text.as_deref())
    }
}

/// 历史消息过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFilter {
    #[default]
    All,
    Audio,
}

#[async_trait]
pub trait TelegramClient: Send + Sync {
    /// 会话名称，也是专属队列的路由键
    fn name(&self) -> &str;

    fn is_bot(&self) -> bool;

    async fn get_chat(&self, chat: &ChatIdentifier) -> TelegramResult<TgChat>;

    async fn get_messages(&self, chat_id: i64, ids: &[i64]) -> TelegramResult<Vec<TgMessage>>;

    /// 按ID升序逐条返回大于 `offset_id` 的消息
    fn iter_messages(
        &self,
        chat_id: i64,
        offset_id: i64,
        filter: MessageFilter,
    ) -> BoxStream<'_, TelegramResult<TgMessage>>;

    /// 返回目标会话中新消息的ID
    async fn forward_messages(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_ids: &[i64],
    ) -> TelegramResult<Vec<i64>>;

    async fn send_audio(
        &self,
        to_chat_id: i64,
        audio: &TgAudio,
        caption: Option<&str>,
    ) -> TelegramResult<TgMessage>;

    async fn send_document(
        &self,
        to_chat_id: i64,
        audio: &TgAudio,
        caption: Option<&str>,
    ) -> TelegramResult<TgMessage>;

    async fn peer_exists(&self, chat: &ChatIdentifier) -> TelegramResult<bool>;
}
