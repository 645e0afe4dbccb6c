//! Test data builders for creating test entities
//!
//! Builders start from sensible defaults so tests only spell out what they check.

use audiobot_domain::{AudioRecord, ChatKind, ChatRecord, TgAudio, TgChat, TgMessage};
use chrono::{DateTime, Utc};

/// Builder for Telegram chats returned by the mock client
pub struct TgChatBuilder {
    chat: TgChat,
}

impl TgChatBuilder {
    pub fn channel(id: i64) -> Self {
        Self {
            chat: TgChat {
                id,
                kind: ChatKind::Channel,
                username: None,
                title: Some(format!("channel {id}")),
                has_protected_content: false,
            },
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.chat.username = Some(username.to_string());
        self
    }

    pub fn with_kind(mut self, kind: ChatKind) -> Self {
        self.chat.kind = kind;
        self
    }

    pub fn protected(mut self) -> Self {
        self.chat.has_protected_content = true;
        self
    }

    pub fn build(self) -> TgChat {
        self.chat
    }
}

/// Builder for Telegram messages
pub struct TgMessageBuilder {
    message: TgMessage,
}

impl TgMessageBuilder {
    pub fn text(chat_id: i64, id: i64, text: &str) -> Self {
        Self {
            message: TgMessage {
                id,
                chat_id,
                text: Some(text.to_string()),
                caption: None,
                audio: None,
                has_protected_content: false,
            },
        }
    }

    pub fn audio(chat_id: i64, id: i64) -> Self {
        Self {
            message: TgMessage {
                id,
                chat_id,
                text: None,
                caption: None,
                audio: Some(tg_audio(&format!("file-{chat_id}-{id}"))),
                has_protected_content: false,
            },
        }
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.message.caption = Some(caption.to_string());
        self
    }

    pub fn as_document(mut self) -> Self {
        if let Some(audio) = self.message.audio.as_mut() {
            audio.is_document = true;
        }
        self
    }

    pub fn protected(mut self) -> Self {
        self.message.has_protected_content = true;
        self
    }

    pub fn build(self) -> TgMessage {
        self.message
    }
}

pub fn tg_audio(file_id: &str) -> TgAudio {
    TgAudio {
        file_id: file_id.to_string(),
        file_unique_id: format!("unique-{file_id}"),
        title: Some("Test Song".to_string()),
        performer: Some("Test Artist".to_string()),
        duration: Some(180),
        is_document: false,
    }
}

/// Builder for stored chats
pub struct ChatRecordBuilder {
    chat: ChatRecord,
}

impl ChatRecordBuilder {
    pub fn new(key: &str, chat_id: i64) -> Self {
        Self {
            chat: ChatRecord::new(key, chat_id),
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.chat.username = Some(username.to_string());
        self
    }

    pub fn with_offset(mut self, offset_id: i64) -> Self {
        self.chat.last_message_offset_id = offset_id;
        self
    }

    pub fn indexed_at(mut self, at: DateTime<Utc>) -> Self {
        self.chat.last_indexed_at = Some(at);
        self
    }

    pub fn invalid(mut self) -> Self {
        self.chat.is_valid = false;
        self
    }

    pub fn build(self) -> ChatRecord {
        self.chat
    }
}

/// Builder for stored audio files
pub struct AudioRecordBuilder {
    audio: AudioRecord,
}

impl AudioRecordBuilder {
    pub fn new(key: &str, chat_id: i64, message_id: i64) -> Self {
        Self {
            audio: AudioRecord {
                key: key.to_string(),
                chat_id,
                message_id,
                file_id: format!("file-{chat_id}-{message_id}"),
                file_unique_id: format!("unique-file-{chat_id}-{message_id}"),
                title: Some("Test Song".to_string()),
                performer: Some("Test Artist".to_string()),
                duration: Some(180),
                is_document: false,
                archived_message_id: None,
            },
        }
    }

    pub fn as_document(mut self) -> Self {
        self.audio.is_document = true;
        self
    }

    pub fn archived_as(mut self, message_id: i64) -> Self {
        self.audio.archived_message_id = Some(message_id);
        self
    }

    pub fn build(self) -> AudioRecord {
        self.audio
    }
}
