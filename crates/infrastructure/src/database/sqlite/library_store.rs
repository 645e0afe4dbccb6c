use async_trait::async_trait;
use audiobot_domain::{
    ArchivedAudio, AudioRecord, ChatRecord, InteractionCount, LibraryStore, TgChat, UsernameRecord,
};
use audiobot_errors::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct SqliteLibraryStore {
    pool: SqlitePool,
}

impl SqliteLibraryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 写入一个待索引的频道
    pub async fn insert_chat(&self, chat: &ChatRecord) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO chats (key, chat_id, username, title, is_valid, last_message_offset_id, last_indexed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chat.key)
        .bind(chat.chat_id)
        .bind(&chat.username)
        .bind(&chat.title)
        .bind(chat.is_valid)
        .bind(chat.last_message_offset_id)
        .bind(chat.last_indexed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 音频累计的交互次数
    pub async fn interaction_count(&self, audio_key: &str) -> SchedulerResult<i64> {
        let row = sqlx::query("SELECT interaction_count FROM audios WHERE key = ?")
            .bind(audio_key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SchedulerError::entity_not_found("audio", audio_key))?;
        Ok(row.try_get("interaction_count")?)
    }

    fn row_to_chat(row: &SqliteRow) -> SchedulerResult<ChatRecord> {
        Ok(ChatRecord {
            key: row.try_get("key")?,
            chat_id: row.try_get("chat_id")?,
            username: row.try_get("username")?,
            title: row.try_get("title")?,
            is_valid: row.try_get("is_valid")?,
            last_message_offset_id: row.try_get("last_message_offset_id")?,
            last_indexed_at: row.try_get("last_indexed_at")?,
        })
    }

    fn row_to_username(row: &SqliteRow) -> SchedulerResult<UsernameRecord> {
        Ok(UsernameRecord {
            key: row.try_get("key")?,
            username: row.try_get("username")?,
            is_valid: row.try_get("is_valid")?,
            is_checked: row.try_get("is_checked")?,
            chat_key: row.try_get("chat_key")?,
            checked_at: row.try_get("checked_at")?,
        })
    }

    fn row_to_audio(row: &SqliteRow) -> SchedulerResult<AudioRecord> {
        let duration: Option<i64> = row.try_get("duration")?;
        Ok(AudioRecord {
            key: row.try_get("key")?,
            chat_id: row.try_get("chat_id")?,
            message_id: row.try_get("message_id")?,
            file_id: row.try_get("file_id")?,
            file_unique_id: row.try_get("file_unique_id")?,
            title: row.try_get("title")?,
            performer: row.try_get("performer")?,
            duration: duration.and_then(|d| u32::try_from(d).ok()),
            is_document: row.try_get("is_document")?,
            archived_message_id: row.try_get("archived_message_id")?,
        })
    }

    fn ensure_updated(rows_affected: u64, entity: &str, key: &str) -> SchedulerResult<()> {
        if rows_affected == 0 {
            return Err(SchedulerError::entity_not_found(entity, key));
        }
        Ok(())
    }
}

#[async_trait]
impl LibraryStore for SqliteLibraryStore {
    async fn get_chat(&self, key: &str) -> SchedulerResult<Option<ChatRecord>> {
        let row = sqlx::query("SELECT * FROM chats WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_chat).transpose()
    }

    async fn update_chat_offset(&self, key: &str, offset_id: i64) -> SchedulerResult<()> {
        // 偏移量只增不减
        let result = sqlx::query(
            "UPDATE chats SET last_message_offset_id = MAX(last_message_offset_id, ?), last_indexed_at = ? \
             WHERE key = ?",
        )
        .bind(offset_id)
        .bind(Utc::now())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), "chat", key)
    }

    async fn mark_chat_invalid(&self, key: &str) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE chats SET is_valid = 0 WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result.rows_affected(), "chat", key)
    }

    async fn list_chats_due_for_indexing(&self, limit: usize) -> SchedulerResult<Vec<ChatRecord>> {
        // 从未索引过的频道优先，其次是最久未索引的
        let rows = sqlx::query(
            "SELECT * FROM chats WHERE is_valid = 1 \
             ORDER BY last_indexed_at IS NOT NULL, last_indexed_at ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_chat).collect()
    }

    async fn get_username(&self, key: &str) -> SchedulerResult<Option<UsernameRecord>> {
        let row = sqlx::query("SELECT * FROM usernames WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_username).transpose()
    }

    async fn mark_username_invalid(&self, key: &str) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE usernames SET is_valid = 0, is_checked = 1, checked_at = ? WHERE key = ?",
        )
        .bind(Utc::now())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), "username", key)
    }

    #[instrument(skip(self, chat), fields(chat_id = chat.id))]
    async fn link_username_to_chat(
        &self,
        username_key: &str,
        chat: &TgChat,
    ) -> SchedulerResult<String> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT key FROM chats WHERE chat_id = ?")
            .bind(chat.id)
            .fetch_optional(&mut *tx)
            .await?;
        let chat_key = match existing {
            Some(row) => row.try_get::<String, _>("key")?,
            None => {
                let key = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO chats (key, chat_id, username, title) VALUES (?, ?, ?, ?)",
                )
                .bind(&key)
                .bind(chat.id)
                .bind(&chat.username)
                .bind(&chat.title)
                .execute(&mut *tx)
                .await?;
                debug!("Created chat {} for telegram chat {}", key, chat.id);
                key
            }
        };

        let result = sqlx::query(
            "UPDATE usernames SET chat_key = ?, is_checked = 1, checked_at = ? WHERE key = ?",
        )
        .bind(&chat_key)
        .bind(Utc::now())
        .bind(username_key)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::entity_not_found("username", username_key));
        }

        tx.commit().await?;
        Ok(chat_key)
    }

    async fn add_unchecked_usernames(&self, usernames: &[String]) -> SchedulerResult<usize> {
        let mut added = 0;
        let now = Utc::now();
        for username in usernames {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO usernames (key, username, created_at) VALUES (?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(username.to_lowercase())
            .bind(now)
            .execute(&self.pool)
            .await?;
            added += result.rows_affected() as usize;
        }
        Ok(added)
    }

    async fn list_unchecked_usernames(&self, limit: usize) -> SchedulerResult<Vec<UsernameRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM usernames WHERE is_checked = 0 AND is_valid = 1 \
             ORDER BY created_at ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_username).collect()
    }

    async fn get_audio(&self, key: &str) -> SchedulerResult<Option<AudioRecord>> {
        let row = sqlx::query("SELECT * FROM audios WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_audio).transpose()
    }

    async fn upsert_audio(&self, audio: &AudioRecord) -> SchedulerResult<String> {
        sqlx::query(
            "INSERT INTO audios (key, chat_id, message_id, file_id, file_unique_id, title, performer, duration, is_document) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(chat_id, message_id) DO UPDATE SET \
                file_id = excluded.file_id, \
                file_unique_id = excluded.file_unique_id, \
                title = excluded.title, \
                performer = excluded.performer, \
                duration = excluded.duration, \
                is_document = excluded.is_document",
        )
        .bind(&audio.key)
        .bind(audio.chat_id)
        .bind(audio.message_id)
        .bind(&audio.file_id)
        .bind(&audio.file_unique_id)
        .bind(&audio.title)
        .bind(&audio.performer)
        .bind(audio.duration.map(i64::from))
        .bind(audio.is_document)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT key FROM audios WHERE chat_id = ? AND message_id = ?")
            .bind(audio.chat_id)
            .bind(audio.message_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("key")?)
    }

    async fn create_archived_audio(&self, archived: &ArchivedAudio) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE audios SET archived_message_id = ? WHERE key = ?")
            .bind(archived.archive_message_id)
            .bind(&archived.source_audio_key)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::entity_not_found(
                "audio",
                archived.source_audio_key.as_str(),
            ));
        }

        sqlx::query(
            "INSERT OR REPLACE INTO archived_audios (source_audio_key, archive_chat_id, archive_message_id, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&archived.source_audio_key)
        .bind(archived.archive_chat_id)
        .bind(archived.archive_message_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_unarchived_audios(&self, limit: usize) -> SchedulerResult<Vec<AudioRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM audios WHERE archived_message_id IS NULL \
             ORDER BY chat_id, message_id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_audio).collect()
    }

    async fn record_interaction(&self, audio_key: &str, at: DateTime<Utc>) -> SchedulerResult<()> {
        sqlx::query("INSERT INTO interactions (audio_key, occurred_at) VALUES (?, ?)")
            .bind(audio_key)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_interactions(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> SchedulerResult<Vec<InteractionCount>> {
        let rows = sqlx::query(
            "SELECT audio_key, COUNT(*) AS count FROM interactions \
             WHERE occurred_at <= ? AND (? IS NULL OR occurred_at > ?) \
             GROUP BY audio_key ORDER BY audio_key",
        )
        .bind(until)
        .bind(since)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let count: i64 = row.try_get("count")?;
                Ok::<_, SchedulerError>(InteractionCount {
                    audio_key: row.try_get("audio_key")?,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }

    async fn interactions_counted_until(&self) -> SchedulerResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT counted_until FROM aggregation_marks WHERE name = ?")
            .bind(INTERACTIONS_MARK)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.try_get("counted_until")).transpose()?)
    }

    async fn apply_interaction_counts(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
        counts: &[InteractionCount],
    ) -> SchedulerResult<bool> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT counted_until FROM aggregation_marks WHERE name = ?")
            .bind(INTERACTIONS_MARK)
            .fetch_optional(&mut *tx)
            .await?;
        let counted_until: Option<DateTime<Utc>> =
            row.map(|row| row.try_get("counted_until")).transpose()?;
        if !window_is_new(counted_until, since, until) {
            debug!("交互窗口已计入: {:?} - {}, 已计入至 {:?}", since, until, counted_until);
            return Ok(false);
        }

        for count in counts {
            sqlx::query("UPDATE audios SET interaction_count = interaction_count + ? WHERE key = ?")
                .bind(count.count as i64)
                .bind(&count.audio_key)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "INSERT INTO aggregation_marks (name, counted_until) VALUES (?, ?) \
             ON CONFLICT(name) DO UPDATE SET counted_until = excluded.counted_until",
        )
        .bind(INTERACTIONS_MARK)
        .bind(until)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}

const INTERACTIONS_MARK: &str = "interactions";

/// 窗口起点不早于已计入的位置，终点在其之后
fn window_is_new(
    counted_until: Option<DateTime<Utc>>,
    since: Option<DateTime<Utc>>,
    until: DateTime<Utc>,
) -> bool {
    match counted_until {
        None => true,
        Some(mark) => since.is_some_and(|since| since >= mark) && until > mark,
    }
}
