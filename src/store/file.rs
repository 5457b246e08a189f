use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::warn;

use super::{
    normalize_title, sort_by_recent_update, ConversationRecord, MessageRecord, PersistenceGateway,
    StoreError, StoredConversation,
};
use crate::core::message::{ConversationId, MessageId, TranscriptRole};

/// Stores each conversation as `<id>.json` inside one directory.
pub struct FileStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles on the documents.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn default_dir() -> Option<PathBuf> {
        ProjectDirs::from("org", "relaychat", "relaychat")
            .map(|dirs| dirs.data_dir().join("conversations"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, id: &ConversationId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn read(&self, id: &ConversationId) -> Result<StoredConversation, StoreError> {
        let path = self.document_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::ConversationNotFound(*id));
            }
            Err(err) => return Err(Self::io_error(&path, err)),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, stored: &StoredConversation) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|err| Self::io_error(&self.dir, err))?;
        let path = self.document_path(&stored.record.id);
        let contents = serde_json::to_string_pretty(stored)?;

        let mut temp_file =
            NamedTempFile::new_in(&self.dir).map_err(|err| Self::io_error(&self.dir, err))?;
        temp_file
            .write_all(contents.as_bytes())
            .map_err(|err| Self::io_error(temp_file.path(), err))?;
        temp_file
            .as_file_mut()
            .sync_all()
            .map_err(|err| Self::io_error(&path, err))?;
        temp_file
            .persist(&path)
            .map_err(|err| Self::io_error(&path, err.error))?;
        Ok(())
    }

    fn update<T>(
        &self,
        id: &ConversationId,
        apply: impl FnOnce(&mut StoredConversation) -> T,
    ) -> Result<T, StoreError> {
        let mut stored = self.read(id)?;
        let result = apply(&mut stored);
        self.write(&stored)?;
        Ok(result)
    }
}

#[async_trait]
impl PersistenceGateway for FileStore {
    async fn create_conversation(&self, record: ConversationRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        if self.document_path(&record.id).exists() {
            return Err(StoreError::ConversationExists(record.id));
        }
        self.write(&StoredConversation::new(record))
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationRecord, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read(id)?.record)
    }

    async fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::io_error(&self.dir, err)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| Self::io_error(&self.dir, err))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|err| Self::io_error(&path, err))
                .and_then(|contents| Ok(serde_json::from_str::<StoredConversation>(&contents)?));
            match parsed {
                Ok(stored) if stored.record.owner == owner => records.push(stored.record),
                Ok(_) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable conversation"),
            }
        }

        sort_by_recent_update(&mut records);
        Ok(records)
    }

    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> Result<(), StoreError> {
        let title = normalize_title(title)?;
        let _guard = self.lock.lock().await;
        self.update(id, |stored| {
            stored.record.title = title;
            stored.record.updated_at = chrono::Utc::now();
        })
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.document_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::ConversationNotFound(*id))
            }
            Err(err) => Err(Self::io_error(&path, err)),
        }
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: TranscriptRole,
        content: &str,
    ) -> Result<MessageRecord, StoreError> {
        let _guard = self.lock.lock().await;
        self.update(conversation_id, |stored| stored.append(role, content))
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read(conversation_id)?.ordered_messages())
    }

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        self.update(conversation_id, |stored| stored.remove(message_id))
    }

    async fn delete_latest_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<MessageId>, StoreError> {
        let _guard = self.lock.lock().await;
        self.update(conversation_id, StoredConversation::remove_latest)
    }
}
