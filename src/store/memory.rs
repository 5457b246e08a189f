use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    normalize_title, sort_by_recent_update, ConversationRecord, MessageRecord, PersistenceGateway,
    StoreError, StoredConversation,
};
use crate::core::message::{ConversationId, MessageId, TranscriptRole};

#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<ConversationId, StoredConversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn create_conversation(&self, record: ConversationRecord) -> Result<(), StoreError> {
        let mut conversations = self.conversations.lock().await;
        if conversations.contains_key(&record.id) {
            return Err(StoreError::ConversationExists(record.id));
        }
        conversations.insert(record.id, StoredConversation::new(record));
        Ok(())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationRecord, StoreError> {
        self.conversations
            .lock()
            .await
            .get(id)
            .map(|stored| stored.record.clone())
            .ok_or(StoreError::ConversationNotFound(*id))
    }

    async fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        let mut records: Vec<_> = self
            .conversations
            .lock()
            .await
            .values()
            .filter(|stored| stored.record.owner == owner)
            .map(|stored| stored.record.clone())
            .collect();
        sort_by_recent_update(&mut records);
        Ok(records)
    }

    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> Result<(), StoreError> {
        let title = normalize_title(title)?;
        let mut conversations = self.conversations.lock().await;
        let stored = conversations
            .get_mut(id)
            .ok_or(StoreError::ConversationNotFound(*id))?;
        stored.record.title = title;
        stored.record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        self.conversations
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::ConversationNotFound(*id))
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: TranscriptRole,
        content: &str,
    ) -> Result<MessageRecord, StoreError> {
        let mut conversations = self.conversations.lock().await;
        let stored = conversations
            .get_mut(conversation_id)
            .ok_or(StoreError::ConversationNotFound(*conversation_id))?;
        Ok(stored.append(role, content))
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRecord>, StoreError> {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .map(StoredConversation::ordered_messages)
            .ok_or(StoreError::ConversationNotFound(*conversation_id))
    }

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.lock().await;
        let stored = conversations
            .get_mut(conversation_id)
            .ok_or(StoreError::ConversationNotFound(*conversation_id))?;
        Ok(stored.remove(message_id))
    }

    async fn delete_latest_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<MessageId>, StoreError> {
        let mut conversations = self.conversations.lock().await;
        let stored = conversations
            .get_mut(conversation_id)
            .ok_or(StoreError::ConversationNotFound(*conversation_id))?;
        Ok(stored.remove_latest())
    }
}
