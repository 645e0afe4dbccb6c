//! 基于Telegram Bot API的客户端
//!
//! 机器人账号无法读取频道历史，`get_messages` 和 `iter_messages` 返回
//! `Unsupported`，索引类任务需要用户账号会话。

use async_trait::async_trait;
use audiobot_config::ClientSessionConfig;
use audiobot_domain::{
    ChatIdentifier, ChatKind, MessageFilter, TelegramClient, TelegramResult, TgAudio, TgChat,
    TgMessage,
};
use audiobot_errors::{SchedulerError, SchedulerResult, TelegramError};
use futures::stream::{self, BoxStream};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BotApiClient {
    name: String,
    base_url: String,
    http: reqwest::Client,
}

impl BotApiClient {
    pub fn new(session: &ClientSessionConfig) -> SchedulerResult<Self> {
        let token = session.bot_token.as_deref().ok_or_else(|| {
            SchedulerError::config_error(format!("客户端 {} 缺少 bot_token", session.name))
        })?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SchedulerError::Internal(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            name: session.name.clone(),
            base_url: format!("{}/bot{}", session.api_url.trim_end_matches('/'), token),
            http,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        chat: Option<&ChatIdentifier>,
    ) -> TelegramResult<T> {
        debug!("Bot API call: {} via {}", method, self.name);

        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(&params)
            .send()
            .await
            .map_err(|e| TelegramError::Rpc(format!("{method} 请求失败: {e}")))?;

        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TelegramError::Rpc(format!("{method} 响应解析失败 ({status}): {e}")))?;

        if body.ok {
            return body
                .result
                .ok_or_else(|| TelegramError::Rpc(format!("{method} 响应缺少result")));
        }

        let error = map_api_error(
            body.error_code.unwrap_or(status.as_u16() as i64),
            body.description.as_deref().unwrap_or_default(),
            body.parameters.and_then(|p| p.retry_after),
            chat,
        );
        warn!("Bot API {} 失败: {}", method, error);
        Err(error)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    username: Option<String>,
    title: Option<String>,
    #[serde(default)]
    has_protected_content: bool,
}

#[derive(Debug, Deserialize)]
struct ApiAudio {
    file_id: String,
    file_unique_id: String,
    title: Option<String>,
    performer: Option<String>,
    duration: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiDocument {
    file_id: String,
    file_unique_id: String,
    file_name: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: i64,
    chat: ApiChat,
    text: Option<String>,
    caption: Option<String>,
    audio: Option<ApiAudio>,
    document: Option<ApiDocument>,
    #[serde(default)]
    has_protected_content: bool,
}

#[derive(Debug, Deserialize)]
struct ApiMessageId {
    message_id: i64,
}

impl From<ApiChat> for TgChat {
    fn from(chat: ApiChat) -> Self {
        let kind = match chat.kind.as_str() {
            "private" => ChatKind::Private,
            "group" => ChatKind::Group,
            "supergroup" => ChatKind::Supergroup,
            _ => ChatKind::Channel,
        };
        TgChat {
            id: chat.id,
            kind,
            username: chat.username,
            title: chat.title,
            has_protected_content: chat.has_protected_content,
        }
    }
}

impl From<ApiMessage> for TgMessage {
    fn from(message: ApiMessage) -> Self {
        let audio = match (message.audio, message.document) {
            (Some(audio), _) => Some(TgAudio {
                file_id: audio.file_id,
                file_unique_id: audio.file_unique_id,
                title: audio.title,
                performer: audio.performer,
                duration: audio.duration,
                is_document: false,
            }),
            // 以文档形式发送的音频文件
            (None, Some(document))
                if document
                    .mime_type
                    .as_deref()
                    .is_some_and(|mime| mime.starts_with("audio/")) =>
            {
                Some(TgAudio {
                    file_id: document.file_id,
                    file_unique_id: document.file_unique_id,
                    title: document.file_name,
                    performer: None,
                    duration: None,
                    is_document: true,
                })
            }
            _ => None,
        };
        TgMessage {
            id: message.message_id,
            chat_id: message.chat.id,
            text: message.text,
            caption: message.caption,
            audio,
            has_protected_content: message.has_protected_content,
        }
    }
}

fn chat_id_param(chat: &ChatIdentifier) -> Value {
    match chat {
        ChatIdentifier::Id(id) => json!(id),
        ChatIdentifier::Username(username) => json!(format!("@{username}")),
    }
}

/// 将Bot API错误映射为客户端错误类型
pub fn map_api_error(
    code: i64,
    description: &str,
    retry_after: Option<u64>,
    chat: Option<&ChatIdentifier>,
) -> TelegramError {
    if let Some(seconds) = retry_after {
        return TelegramError::FloodWait { seconds };
    }
    if code == 429 {
        return TelegramError::FloodWait { seconds: 0 };
    }

    let lower = description.to_lowercase();
    if lower.contains("username_invalid") || lower.contains("username invalid") {
        return TelegramError::UsernameInvalid(description.to_string());
    }
    if lower.contains("forwards_restricted") || lower.contains("protected content") {
        return TelegramError::ChatForwardsRestricted(description.to_string());
    }
    if lower.contains("chat not found") || lower.contains("channel_invalid") {
        return match chat {
            Some(ChatIdentifier::Username(username)) => {
                TelegramError::UsernameNotOccupied(username.clone())
            }
            _ => TelegramError::ChannelInvalid(description.to_string()),
        };
    }
    TelegramError::Rpc(format!("{code}: {description}"))
}

#[async_trait]
impl TelegramClient for BotApiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_bot(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(client = %self.name))]
    async fn get_chat(&self, chat: &ChatIdentifier) -> TelegramResult<TgChat> {
        let result: ApiChat = self
            .call("getChat", json!({ "chat_id": chat_id_param(chat) }), Some(chat))
            .await?;
        Ok(result.into())
    }

    async fn get_messages(&self, _chat_id: i64, _ids: &[i64]) -> TelegramResult<Vec<TgMessage>> {
        Err(TelegramError::Unsupported("机器人账号无法按ID读取消息".to_string()))
    }

    fn iter_messages(
        &self,
        _chat_id: i64,
        _offset_id: i64,
        _filter: MessageFilter,
    ) -> BoxStream<'_, TelegramResult<TgMessage>> {
        Box::pin(stream::once(async {
            Err(TelegramError::Unsupported(
                "机器人账号无法读取历史消息".to_string(),
            ))
        }))
    }

    async fn forward_messages(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_ids: &[i64],
    ) -> TelegramResult<Vec<i64>> {
        let result: Vec<ApiMessageId> = self
            .call(
                "forwardMessages",
                json!({
                    "chat_id": to_chat_id,
                    "from_chat_id": from_chat_id,
                    "message_ids": message_ids,
                }),
                Some(&ChatIdentifier::Id(from_chat_id)),
            )
            .await?;
        Ok(result.into_iter().map(|m| m.message_id).collect())
    }

    async fn send_audio(
        &self,
        to_chat_id: i64,
        audio: &TgAudio,
        caption: Option<&str>,
    ) -> TelegramResult<TgMessage> {
        let result: ApiMessage = self
            .call(
                "sendAudio",
                json!({ "chat_id": to_chat_id, "audio": audio.file_id, "caption": caption }),
                None,
            )
            .await?;
        Ok(result.into())
    }

    async fn send_document(
        &self,
        to_chat_id: i64,
        audio: &TgAudio,
        caption: Option<&str>,
    ) -> TelegramResult<TgMessage> {
        let result: ApiMessage = self
            .call(
                "sendDocument",
                json!({ "chat_id": to_chat_id, "document": audio.file_id, "caption": caption }),
                None,
            )
            .await?;
        Ok(result.into())
    }

    async fn peer_exists(&self, chat: &ChatIdentifier) -> TelegramResult<bool> {
        match self.get_chat(chat).await {
            Ok(_) => Ok(true),
            Err(
                TelegramError::ChannelInvalid(_)
                | TelegramError::UsernameNotOccupied(_)
                | TelegramError::UsernameInvalid(_),
            ) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
