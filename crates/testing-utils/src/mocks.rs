//! Mock implementations of the store, client and broker traits
//!
//! All mocks keep their state behind `Arc<Mutex<..>>` so clones share state,
//! which lets a test hand a clone to the code under test and inspect the original.

use async_trait::async_trait;
use audiobot_domain::{
    ArchivedAudio, AudioRecord, ChatIdentifier, ChatRecord, DeliveryStream, ExchangeDescriptor,
    InteractionCount, JobConfig, JobType, LibraryStore, MemoryProbe, MessageBroker,
    MessageFilter, OutboundMessage, QueueDescriptor, TaskStatus, TaskStatusRecord,
    TaskStatusStore, TelegramClient, TelegramResult, TgAudio, TgChat, TgMessage, UsernameRecord,
};
use audiobot_errors::{SchedulerError, SchedulerResult, TelegramError};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock implementation of TaskStatusStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockTaskStatusStore {
    records: Arc<Mutex<HashMap<String, TaskStatusRecord>>>,
    /// Every status a record has held, in order, including the initial one
    history: Arc<Mutex<HashMap<String, Vec<TaskStatus>>>>,
    job_configs: Arc<Mutex<HashMap<JobType, JobConfig>>>,
    watermark_updates: Arc<Mutex<Vec<(JobType, DateTime<Utc>)>>>,
    fail_watermark_updates: Arc<AtomicBool>,
    fail_status_updates: Arc<AtomicBool>,
}

impl MockTaskStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_config(self, config: JobConfig) -> Self {
        self.job_configs
            .lock()
            .unwrap()
            .insert(config.job_type, config);
        self
    }

    pub fn record(&self, key: &str) -> Option<TaskStatusRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn all_records(&self) -> Vec<TaskStatusRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn records_of_type(&self, task_type: &str) -> Vec<TaskStatusRecord> {
        self.all_records()
            .into_iter()
            .filter(|r| r.task_type == task_type)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn status_history(&self, key: &str) -> Vec<TaskStatus> {
        self.history
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn job_config(&self, job_type: JobType) -> Option<JobConfig> {
        self.job_configs.lock().unwrap().get(&job_type).cloned()
    }

    pub fn watermark_updates(&self) -> Vec<(JobType, DateTime<Utc>)> {
        self.watermark_updates.lock().unwrap().clone()
    }

    /// Makes `update_task_status` fail with a database error
    pub fn fail_status_updates(&self) {
        self.fail_status_updates.store(true, Ordering::SeqCst);
    }

    /// Makes `update_job_last_run` fail, simulating a lost watermark write
    pub fn fail_watermark_updates(&self) {
        self.fail_watermark_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStatusStore for MockTaskStatusStore {
    async fn create_task_status(&self, record: &TaskStatusRecord) -> SchedulerResult<()> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.key) {
            return Err(SchedulerError::database_error(format!(
                "duplicate key {}",
                record.key
            )));
        }
        records.insert(record.key.clone(), record.clone());
        self.history
            .lock()
            .unwrap()
            .insert(record.key.clone(), vec![record.status]);
        Ok(())
    }

    async fn get_active_task_status(
        &self,
        task_type: &str,
        fingerprint: Option<&str>,
    ) -> SchedulerResult<Option<TaskStatusRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.task_type == task_type
                    && r.fingerprint.as_deref() == fingerprint
                    && r.status.is_active()
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn get_task_status_by_key(&self, key: &str) -> SchedulerResult<Option<TaskStatusRecord>> {
        Ok(self.record(key))
    }

    async fn update_task_status(&self, key: &str, status: TaskStatus) -> SchedulerResult<bool> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(SchedulerError::database_error("status update failed"));
        }
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(key) else {
            return Ok(false);
        };
        if record.status.can_transition_to(status) {
            record.status = status;
            record.updated_at = Utc::now();
            self.history
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .push(status);
        }
        Ok(true)
    }

    async fn get_job_config(&self, job_type: JobType) -> SchedulerResult<Option<JobConfig>> {
        Ok(self.job_config(job_type))
    }

    async fn update_job_last_run(
        &self,
        job_type: JobType,
        last_run_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        if self.fail_watermark_updates.load(Ordering::SeqCst) {
            return Err(SchedulerError::database_error("watermark update failed"));
        }
        self.watermark_updates
            .lock()
            .unwrap()
            .push((job_type, last_run_at));
        let mut configs = self.job_configs.lock().unwrap();
        let config = configs
            .entry(job_type)
            .or_insert_with(|| JobConfig::new(job_type));
        if config.last_run_at.map_or(true, |current| current < last_run_at) {
            config.last_run_at = Some(last_run_at);
        }
        Ok(())
    }
}

/// Mock implementation of LibraryStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockLibraryStore {
    chats: Arc<Mutex<HashMap<String, ChatRecord>>>,
    usernames: Arc<Mutex<HashMap<String, UsernameRecord>>>,
    audios: Arc<Mutex<HashMap<String, AudioRecord>>>,
    archived: Arc<Mutex<Vec<ArchivedAudio>>>,
    interactions: Arc<Mutex<Vec<(String, DateTime<Utc>)>>>,
    applied_counts: Arc<Mutex<Vec<InteractionCount>>>,
    offset_updates: Arc<Mutex<Vec<(String, i64)>>>,
    count_calls: Arc<AtomicUsize>,
    fail_apply_counts: Arc<Mutex<bool>>,
    counted_until: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl MockLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat(self, chat: ChatRecord) -> Self {
        self.chats.lock().unwrap().insert(chat.key.clone(), chat);
        self
    }

    pub fn with_username(self, username: UsernameRecord) -> Self {
        self.usernames
            .lock()
            .unwrap()
            .insert(username.key.clone(), username);
        self
    }

    pub fn with_audio(self, audio: AudioRecord) -> Self {
        self.audios.lock().unwrap().insert(audio.key.clone(), audio);
        self
    }

    pub fn with_interaction(self, audio_key: &str, at: DateTime<Utc>) -> Self {
        self.interactions
            .lock()
            .unwrap()
            .push((audio_key.to_string(), at));
        self
    }

    /// Makes `apply_interaction_counts` fail, simulating a persistence error
    pub fn fail_applying_counts(&self) {
        *self.fail_apply_counts.lock().unwrap() = true;
    }

    pub fn chat(&self, key: &str) -> Option<ChatRecord> {
        self.chats.lock().unwrap().get(key).cloned()
    }

    pub fn chats(&self) -> Vec<ChatRecord> {
        self.chats.lock().unwrap().values().cloned().collect()
    }

    pub fn username(&self, key: &str) -> Option<UsernameRecord> {
        self.usernames.lock().unwrap().get(key).cloned()
    }

    pub fn usernames(&self) -> Vec<UsernameRecord> {
        self.usernames.lock().unwrap().values().cloned().collect()
    }

    pub fn audio(&self, key: &str) -> Option<AudioRecord> {
        self.audios.lock().unwrap().get(key).cloned()
    }

    pub fn audios(&self) -> Vec<AudioRecord> {
        self.audios.lock().unwrap().values().cloned().collect()
    }

    pub fn archived(&self) -> Vec<ArchivedAudio> {
        self.archived.lock().unwrap().clone()
    }

    pub fn applied_counts(&self) -> Vec<InteractionCount> {
        self.applied_counts.lock().unwrap().clone()
    }

    pub fn offset_updates(&self) -> Vec<(String, i64)> {
        self.offset_updates.lock().unwrap().clone()
    }

    pub fn count_interactions_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    /// Sum of all applied counts for one audio
    pub fn total_applied(&self, audio_key: &str) -> u64 {
        self.applied_counts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.audio_key == audio_key)
            .map(|c| c.count)
            .sum()
    }

    pub fn counted_until(&self) -> Option<DateTime<Utc>> {
        *self.counted_until.lock().unwrap()
    }
}

#[async_trait]
impl LibraryStore for MockLibraryStore {
    async fn get_chat(&self, key: &str) -> SchedulerResult<Option<ChatRecord>> {
        Ok(self.chat(key))
    }

    async fn update_chat_offset(&self, key: &str, offset_id: i64) -> SchedulerResult<()> {
        let mut chats = self.chats.lock().unwrap();
        let chat = chats
            .get_mut(key)
            .ok_or_else(|| SchedulerError::entity_not_found("chat", key))?;
        chat.last_message_offset_id = chat.last_message_offset_id.max(offset_id);
        chat.last_indexed_at = Some(Utc::now());
        self.offset_updates
            .lock()
            .unwrap()
            .push((key.to_string(), offset_id));
        Ok(())
    }

    async fn mark_chat_invalid(&self, key: &str) -> SchedulerResult<()> {
        let mut chats = self.chats.lock().unwrap();
        let chat = chats
            .get_mut(key)
            .ok_or_else(|| SchedulerError::entity_not_found("chat", key))?;
        chat.is_valid = false;
        Ok(())
    }

    async fn list_chats_due_for_indexing(&self, limit: usize) -> SchedulerResult<Vec<ChatRecord>> {
        let mut chats: Vec<ChatRecord> = self
            .chats()
            .into_iter()
            .filter(|c| c.is_valid)
            .collect();
        chats.sort_by(|a, b| {
            (a.last_indexed_at.is_some(), a.last_indexed_at, &a.key)
                .cmp(&(b.last_indexed_at.is_some(), b.last_indexed_at, &b.key))
        });
        chats.truncate(limit);
        Ok(chats)
    }

    async fn get_username(&self, key: &str) -> SchedulerResult<Option<UsernameRecord>> {
        Ok(self.username(key))
    }

    async fn mark_username_invalid(&self, key: &str) -> SchedulerResult<()> {
        let mut usernames = self.usernames.lock().unwrap();
        let username = usernames
            .get_mut(key)
            .ok_or_else(|| SchedulerError::entity_not_found("username", key))?;
        username.is_valid = false;
        username.is_checked = true;
        username.checked_at = Some(Utc::now());
        Ok(())
    }

    async fn link_username_to_chat(
        &self,
        username_key: &str,
        chat: &TgChat,
    ) -> SchedulerResult<String> {
        let chat_key = {
            let mut chats = self.chats.lock().unwrap();
            match chats.values().find(|c| c.chat_id == chat.id) {
                Some(existing) => existing.key.clone(),
                None => {
                    let key = format!("chat-{}", chat.id);
                    let mut record = ChatRecord::new(key.clone(), chat.id);
                    record.username = chat.username.clone();
                    record.title = chat.title.clone();
                    chats.insert(key.clone(), record);
                    key
                }
            }
        };

        let mut usernames = self.usernames.lock().unwrap();
        let username = usernames
            .get_mut(username_key)
            .ok_or_else(|| SchedulerError::entity_not_found("username", username_key))?;
        username.chat_key = Some(chat_key.clone());
        username.is_checked = true;
        username.checked_at = Some(Utc::now());
        Ok(chat_key)
    }

    async fn add_unchecked_usernames(&self, usernames: &[String]) -> SchedulerResult<usize> {
        let mut stored = self.usernames.lock().unwrap();
        let mut added = 0;
        for username in usernames {
            let username = username.to_lowercase();
            if stored.values().any(|u| u.username == username) {
                continue;
            }
            let key = format!("username-{username}");
            stored.insert(key.clone(), UsernameRecord::unchecked(key, username));
            added += 1;
        }
        Ok(added)
    }

    async fn list_unchecked_usernames(&self, limit: usize) -> SchedulerResult<Vec<UsernameRecord>> {
        let mut usernames: Vec<UsernameRecord> = self
            .usernames()
            .into_iter()
            .filter(|u| !u.is_checked && u.is_valid)
            .collect();
        usernames.sort_by(|a, b| a.key.cmp(&b.key));
        usernames.truncate(limit);
        Ok(usernames)
    }

    async fn get_audio(&self, key: &str) -> SchedulerResult<Option<AudioRecord>> {
        Ok(self.audio(key))
    }

    async fn upsert_audio(&self, audio: &AudioRecord) -> SchedulerResult<String> {
        let mut audios = self.audios.lock().unwrap();
        if let Some(existing) = audios
            .values_mut()
            .find(|a| a.chat_id == audio.chat_id && a.message_id == audio.message_id)
        {
            let key = existing.key.clone();
            let archived = existing.archived_message_id;
            *existing = AudioRecord {
                key: key.clone(),
                archived_message_id: archived,
                ..audio.clone()
            };
            return Ok(key);
        }
        audios.insert(audio.key.clone(), audio.clone());
        Ok(audio.key.clone())
    }

    async fn create_archived_audio(&self, archived: &ArchivedAudio) -> SchedulerResult<()> {
        let mut audios = self.audios.lock().unwrap();
        let audio = audios
            .get_mut(&archived.source_audio_key)
            .ok_or_else(|| {
                SchedulerError::entity_not_found("audio", archived.source_audio_key.as_str())
            })?;
        audio.archived_message_id = Some(archived.archive_message_id);
        self.archived.lock().unwrap().push(archived.clone());
        Ok(())
    }

    async fn list_unarchived_audios(&self, limit: usize) -> SchedulerResult<Vec<AudioRecord>> {
        let mut audios: Vec<AudioRecord> = self
            .audios()
            .into_iter()
            .filter(|a| a.archived_message_id.is_none())
            .collect();
        audios.sort_by_key(|a| (a.chat_id, a.message_id));
        audios.truncate(limit);
        Ok(audios)
    }

    async fn record_interaction(&self, audio_key: &str, at: DateTime<Utc>) -> SchedulerResult<()> {
        self.interactions
            .lock()
            .unwrap()
            .push((audio_key.to_string(), at));
        Ok(())
    }

    async fn count_interactions(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> SchedulerResult<Vec<InteractionCount>> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        let mut counts: HashMap<String, u64> = HashMap::new();
        for (audio_key, at) in self.interactions.lock().unwrap().iter() {
            if *at <= until && since.map_or(true, |since| *at > since) {
                *counts.entry(audio_key.clone()).or_default() += 1;
            }
        }
        let mut counts: Vec<InteractionCount> = counts
            .into_iter()
            .map(|(audio_key, count)| InteractionCount { audio_key, count })
            .collect();
        counts.sort_by(|a, b| a.audio_key.cmp(&b.audio_key));
        Ok(counts)
    }

    async fn interactions_counted_until(&self) -> SchedulerResult<Option<DateTime<Utc>>> {
        Ok(self.counted_until())
    }

    async fn apply_interaction_counts(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
        counts: &[InteractionCount],
    ) -> SchedulerResult<bool> {
        if *self.fail_apply_counts.lock().unwrap() {
            return Err(SchedulerError::database_error("apply failed"));
        }
        let mut counted_until = self.counted_until.lock().unwrap();
        if let Some(mark) = *counted_until {
            if !since.is_some_and(|since| since >= mark) || until <= mark {
                return Ok(false);
            }
        }
        self.applied_counts
            .lock()
            .unwrap()
            .extend(counts.iter().cloned());
        *counted_until = Some(until);
        Ok(true)
    }
}

/// Scriptable Telegram client double
#[derive(Debug, Clone)]
pub struct MockTelegramClient {
    name: String,
    is_bot: bool,
    chats: Arc<Mutex<HashMap<ChatIdentifier, TgChat>>>,
    messages: Arc<Mutex<HashMap<i64, Vec<TgMessage>>>>,
    /// Errors returned by the next API calls, in order
    scripted_errors: Arc<Mutex<VecDeque<TelegramError>>>,
    /// `iter_messages` yields this FloodWait after the given number of messages
    stream_error_after: Arc<Mutex<Option<(usize, TelegramError)>>>,
    calls: Arc<Mutex<Vec<String>>>,
    forwarded: Arc<Mutex<Vec<(i64, i64, Vec<i64>)>>>,
    sent: Arc<Mutex<Vec<(String, i64, TgAudio)>>>,
    next_message_id: Arc<Mutex<i64>>,
}

impl MockTelegramClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_bot: false,
            chats: Arc::default(),
            messages: Arc::default(),
            scripted_errors: Arc::default(),
            stream_error_after: Arc::default(),
            calls: Arc::default(),
            forwarded: Arc::default(),
            sent: Arc::default(),
            next_message_id: Arc::new(Mutex::new(1000)),
        }
    }

    pub fn bot(name: &str) -> Self {
        Self {
            is_bot: true,
            ..Self::new(name)
        }
    }

    /// Registers a chat under its id and, when present, its username
    pub fn with_chat(self, chat: TgChat) -> Self {
        {
            let mut chats = self.chats.lock().unwrap();
            if let Some(username) = &chat.username {
                chats.insert(ChatIdentifier::Username(username.clone()), chat.clone());
            }
            chats.insert(ChatIdentifier::Id(chat.id), chat);
        }
        self
    }

    pub fn with_messages(self, chat_id: i64, messages: Vec<TgMessage>) -> Self {
        self.messages
            .lock()
            .unwrap()
            .entry(chat_id)
            .or_default()
            .extend(messages);
        self
    }

    pub fn fail_next_with(&self, error: TelegramError) {
        self.scripted_errors.lock().unwrap().push_back(error);
    }

    pub fn flood_wait_after(&self, messages: usize, seconds: u64) {
        self.stream_error_after(messages, TelegramError::FloodWait { seconds });
    }

    /// Ends `iter_messages` with `error` after yielding `messages` items
    pub fn stream_error_after(&self, messages: usize, error: TelegramError) {
        *self.stream_error_after.lock().unwrap() = Some((messages, error));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn forwarded(&self) -> Vec<(i64, i64, Vec<i64>)> {
        self.forwarded.lock().unwrap().clone()
    }

    /// Re-uploads as `(method, to_chat_id, audio)`
    pub fn sent(&self) -> Vec<(String, i64, TgAudio)> {
        self.sent.lock().unwrap().clone()
    }

    fn begin(&self, method: &str) -> TelegramResult<()> {
        self.calls.lock().unwrap().push(method.to_string());
        match self.scripted_errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&self) -> i64 {
        let mut next = self.next_message_id.lock().unwrap();
        *next += 1;
        *next
    }

    fn upload(&self, method: &str, to_chat_id: i64, audio: &TgAudio) -> TelegramResult<TgMessage> {
        self.begin(method)?;
        self.sent
            .lock()
            .unwrap()
            .push((method.to_string(), to_chat_id, audio.clone()));
        Ok(TgMessage {
            id: self.next_id(),
            chat_id: to_chat_id,
            text: None,
            caption: None,
            audio: Some(audio.clone()),
            has_protected_content: false,
        })
    }
}

#[async_trait]
impl TelegramClient for MockTelegramClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_bot(&self) -> bool {
        self.is_bot
    }

    async fn get_chat(&self, chat: &ChatIdentifier) -> TelegramResult<TgChat> {
        self.begin("get_chat")?;
        self.chats
            .lock()
            .unwrap()
            .get(chat)
            .cloned()
            .ok_or_else(|| match chat {
                ChatIdentifier::Username(username) => {
                    TelegramError::UsernameNotOccupied(username.clone())
                }
                ChatIdentifier::Id(id) => TelegramError::ChannelInvalid(id.to_string()),
            })
    }

    async fn get_messages(&self, chat_id: i64, ids: &[i64]) -> TelegramResult<Vec<TgMessage>> {
        self.begin("get_messages")?;
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&chat_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| ids.contains(&m.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn iter_messages(
        &self,
        chat_id: i64,
        offset_id: i64,
        filter: MessageFilter,
    ) -> BoxStream<'_, TelegramResult<TgMessage>> {
        if let Err(error) = self.begin("iter_messages") {
            return Box::pin(stream::iter(vec![Err(error)]));
        }
        if !self
            .chats
            .lock()
            .unwrap()
            .contains_key(&ChatIdentifier::Id(chat_id))
        {
            return Box::pin(stream::iter(vec![Err(TelegramError::ChannelInvalid(
                chat_id.to_string(),
            ))]));
        }

        let mut messages: Vec<TgMessage> = self
            .messages
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.id > offset_id)
            .filter(|m| filter == MessageFilter::All || m.audio.is_some())
            .collect();
        messages.sort_by_key(|m| m.id);

        let mut items: Vec<TelegramResult<TgMessage>> = messages.into_iter().map(Ok).collect();
        if let Some((after, error)) = self.stream_error_after.lock().unwrap().clone() {
            if after < items.len() {
                items.truncate(after);
                items.push(Err(error));
            }
        }
        Box::pin(stream::iter(items))
    }

    async fn forward_messages(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_ids: &[i64],
    ) -> TelegramResult<Vec<i64>> {
        self.begin("forward_messages")?;
        let protected = self
            .chats
            .lock()
            .unwrap()
            .get(&ChatIdentifier::Id(from_chat_id))
            .is_some_and(|c| c.has_protected_content)
            || self.messages.lock().unwrap().get(&from_chat_id).is_some_and(|messages| {
                messages
                    .iter()
                    .any(|m| message_ids.contains(&m.id) && m.has_protected_content)
            });
        if protected {
            return Err(TelegramError::ChatForwardsRestricted(from_chat_id.to_string()));
        }
        self.forwarded
            .lock()
            .unwrap()
            .push((to_chat_id, from_chat_id, message_ids.to_vec()));
        Ok(message_ids.iter().map(|_| self.next_id()).collect())
    }

    async fn send_audio(
        &self,
        to_chat_id: i64,
        audio: &TgAudio,
        _caption: Option<&str>,
    ) -> TelegramResult<TgMessage> {
        self.upload("send_audio", to_chat_id, audio)
    }

    async fn send_document(
        &self,
        to_chat_id: i64,
        audio: &TgAudio,
        _caption: Option<&str>,
    ) -> TelegramResult<TgMessage> {
        self.upload("send_document", to_chat_id, audio)
    }

    async fn peer_exists(&self, chat: &ChatIdentifier) -> TelegramResult<bool> {
        self.begin("peer_exists")?;
        Ok(self.chats.lock().unwrap().contains_key(chat))
    }
}

/// Broker double that records every publish and hands out pending streams
#[derive(Debug, Clone, Default)]
pub struct RecordingBroker {
    published: Arc<Mutex<Vec<OutboundMessage>>>,
    declared_queues: Arc<Mutex<Vec<QueueDescriptor>>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn declared_queues(&self) -> Vec<QueueDescriptor> {
        self.declared_queues.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBroker for RecordingBroker {
    async fn declare(
        &self,
        _exchanges: &[ExchangeDescriptor],
        queues: &[QueueDescriptor],
    ) -> SchedulerResult<()> {
        self.declared_queues
            .lock()
            .unwrap()
            .extend(queues.iter().cloned());
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> SchedulerResult<()> {
        self.published.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn consume(
        &self,
        _queue: &QueueDescriptor,
        _consumer_tag: &str,
        _prefetch: u16,
    ) -> SchedulerResult<DeliveryStream> {
        Ok(Box::pin(stream::pending()))
    }
}

/// Broker double whose first `failures` publishes fail with a transport error
#[derive(Debug, Clone)]
pub struct FlakyBroker {
    inner: RecordingBroker,
    failures_remaining: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

impl FlakyBroker {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: RecordingBroker::new(),
            failures_remaining: Arc::new(AtomicU32::new(failures)),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn published_count(&self) -> usize {
        self.inner.published_count()
    }
}

#[async_trait]
impl MessageBroker for FlakyBroker {
    async fn declare(
        &self,
        exchanges: &[ExchangeDescriptor],
        queues: &[QueueDescriptor],
    ) -> SchedulerResult<()> {
        self.inner.declare(exchanges, queues).await
    }

    async fn publish(&self, message: &OutboundMessage) -> SchedulerResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SchedulerError::MessageQueue("connection reset".to_string()));
        }
        self.inner.publish(message).await
    }

    async fn consume(
        &self,
        queue: &QueueDescriptor,
        consumer_tag: &str,
        prefetch: u16,
    ) -> SchedulerResult<DeliveryStream> {
        self.inner.consume(queue, consumer_tag, prefetch).await
    }
}

/// Memory probe returning a fixed value
#[derive(Debug, Clone, Copy)]
pub struct MockMemoryProbe(pub Option<u64>);

impl MemoryProbe for MockMemoryProbe {
    fn available_memory_mb(&self) -> Option<u64> {
        self.0
    }
}
