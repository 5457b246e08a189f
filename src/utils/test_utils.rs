use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use tokio::sync::mpsc;

use crate::api::ChatMessage;
use crate::core::completion::{ByteStream, CompletionGateway, StreamError};
use crate::core::conversation::{Conversation, ConversationOptions};
use crate::core::message::{ConversationId, MessageId, TranscriptRole};
use crate::store::memory::MemoryStore;
use crate::store::{ConversationRecord, MessageRecord, PersistenceGateway, StoreError};

/// Serialises one SSE data frame carrying `text` as the first choice's delta.
pub fn delta_frame(text: &str) -> String {
    let payload = serde_json::json!({ "choices": [{ "delta": { "content": text } }] });
    format!("data: {payload}\n\n")
}

pub fn done_frame() -> &'static str {
    "data: [DONE]\n\n"
}

/// Concatenates delta frames for `parts` followed by the sentinel.
pub fn sse_body(parts: &[&str]) -> String {
    let mut body: String = parts.iter().map(|part| delta_frame(part)).collect();
    body.push_str(done_frame());
    body
}

pub fn chunks_of(body: &[u8], size: usize) -> Vec<Result<Bytes, StreamError>> {
    body.chunks(size.max(1))
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect()
}

pub enum Script {
    Chunks(Vec<Result<Bytes, StreamError>>),
    Channel(mpsc::UnboundedReceiver<Result<Bytes, StreamError>>),
    Fail(StreamError),
}

/// Completion gateway that answers each request with the next queued script
/// and records the transcripts it was sent.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_body(&self, body: impl Into<String>) {
        let body = body.into();
        self.push(Script::Chunks(chunks_of(body.as_bytes(), body.len())));
    }

    /// Queues a live stream; the returned sender feeds it and dropping it ends it.
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<Bytes, StreamError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Channel(rx));
        tx
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn open_stream(&self, messages: Vec<ChatMessage>) -> Result<ByteStream, StreamError> {
        self.requests.lock().unwrap().push(messages);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Fail(StreamError::Connection("no script queued".into())));

        match script {
            Script::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks))),
            Script::Channel(rx) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
            Script::Fail(err) => Err(err),
        }
    }
}

/// Store wrapper whose writes can be switched to fail.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: Mutex<bool>,
    fail_reads: Mutex<bool>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            fail_writes: Mutex::new(false),
            fail_reads: Mutex::new(false),
        })
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    fn write_guard(&self) -> Result<(), StoreError> {
        if *self.fail_writes.lock().unwrap() {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    fn read_guard(&self) -> Result<(), StoreError> {
        if *self.fail_reads.lock().unwrap() {
            return Err(StoreError::Unavailable("reads disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for FlakyStore {
    async fn create_conversation(&self, record: ConversationRecord) -> Result<(), StoreError> {
        self.write_guard()?;
        self.inner.create_conversation(record).await
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationRecord, StoreError> {
        self.read_guard()?;
        self.inner.get_conversation(id).await
    }

    async fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        self.read_guard()?;
        self.inner.list_conversations(owner).await
    }

    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> Result<(), StoreError> {
        self.write_guard()?;
        self.inner.rename_conversation(id, title).await
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        self.write_guard()?;
        self.inner.delete_conversation(id).await
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: TranscriptRole,
        content: &str,
    ) -> Result<MessageRecord, StoreError> {
        self.write_guard()?;
        self.inner.append_message(conversation_id, role, content).await
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRecord>, StoreError> {
        self.read_guard()?;
        self.inner.list_messages(conversation_id).await
    }

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<bool, StoreError> {
        self.write_guard()?;
        self.inner.delete_message(conversation_id, message_id).await
    }

    async fn delete_latest_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<MessageId>, StoreError> {
        self.write_guard()?;
        self.inner.delete_latest_message(conversation_id).await
    }
}

/// A conversation over a fresh in-memory store, already opened.
pub async fn create_test_conversation() -> (Conversation, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut conversation = Conversation::new(store.clone(), ConversationOptions::default());
    conversation
        .open(None)
        .await
        .expect("opening a fresh conversation");
    (conversation, store)
}
