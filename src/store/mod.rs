//! Persistence Gateway seam.
//!
//! The conversation state machine only needs the operations below and relies
//! on `list_messages` returning messages in creation order. [`memory`] backs
//! tests and ephemeral sessions; [`file`] keeps one JSON document per
//! conversation on disk.

pub mod file;
pub mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::message::{ConversationId, Message, MessageId, TranscriptRole};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(id: ConversationId, title: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            owner: owner.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: TranscriptRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(conversation_id: ConversationId, role: TranscriptRole, content: &str) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            id: Some(self.id),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("conversation {0} already exists")]
    ConversationExists(ConversationId),

    #[error("conversation title must not be blank")]
    InvalidTitle,

    #[error("storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize stored conversation: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn create_conversation(&self, record: ConversationRecord) -> Result<(), StoreError>;

    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationRecord, StoreError>;

    /// Conversations for `owner`, most recently updated first.
    async fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationRecord>, StoreError>;

    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> Result<(), StoreError>;

    /// Deletes the conversation together with its messages.
    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError>;

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: TranscriptRole,
        content: &str,
    ) -> Result<MessageRecord, StoreError>;

    /// Messages in creation order, oldest first.
    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRecord>, StoreError>;

    /// Returns whether a message was removed.
    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<bool, StoreError>;

    /// Removes the most recently created message. Racy under concurrent
    /// writers; prefer [`PersistenceGateway::delete_message`].
    async fn delete_latest_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<MessageId>, StoreError>;
}

/// Trims a proposed title, rejecting blank ones.
pub fn normalize_title(title: &str) -> Result<String, StoreError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidTitle);
    }
    Ok(trimmed.to_string())
}

/// Case-insensitive substring match over conversation titles.
pub fn filter_by_title(records: Vec<ConversationRecord>, query: &str) -> Vec<ConversationRecord> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|record| record.title.to_lowercase().contains(&needle))
        .collect()
}

/// A conversation document as held by the stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredConversation {
    pub record: ConversationRecord,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

impl StoredConversation {
    pub fn new(record: ConversationRecord) -> Self {
        Self {
            record,
            messages: Vec::new(),
        }
    }

    pub fn append(&mut self, role: TranscriptRole, content: &str) -> MessageRecord {
        let message = MessageRecord::new(self.record.id, role, content);
        self.record.updated_at = message.created_at.max(self.record.updated_at);
        self.messages.push(message.clone());
        message
    }

    /// Append order, which is creation order even if the wall clock steps back.
    pub fn ordered_messages(&self) -> Vec<MessageRecord> {
        self.messages.clone()
    }

    pub fn remove(&mut self, message_id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|message| &message.id != message_id);
        self.messages.len() != before
    }

    pub fn remove_latest(&mut self) -> Option<MessageId> {
        self.messages.pop().map(|message| message.id)
    }
}

pub(crate) fn sort_by_recent_update(records: &mut [ConversationRecord]) {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
