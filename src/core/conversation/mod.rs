//! Conversation state machine.
//!
//! A [`Conversation`] owns the transcript and the conversation identifier for
//! as long as it lives. It moves through `Idle -> Resolving -> Ready` when a
//! conversation is opened, and between `Ready` and `Streaming` for each
//! completion request. Stream callbacks are matched against the session they
//! were started under, so a late chunk from an abandoned session never touches
//! the current transcript.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ChatMessage;
use crate::core::chat_stream::StreamMessage;
use crate::core::completion::StreamError;
use crate::core::constants::{DEFAULT_CONVERSATION_TITLE, DEFAULT_OWNER};
use crate::core::message::{ConversationId, Message, MessageId, Transcript, TranscriptRole};
use crate::store::{
    filter_by_title, normalize_title, ConversationRecord, PersistenceGateway, StoreError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Resolving,
    Ready,
    Streaming,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversationState::Idle => "idle",
            ConversationState::Resolving => "resolving",
            ConversationState::Ready => "ready",
            ConversationState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct ConversationOptions {
    /// Owner recorded on conversations this machine creates.
    pub owner: String,
    /// Persist the partial assistant text of a failed or cancelled session.
    pub persist_partial_responses: bool,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            persist_partial_responses: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation is {0}")]
    NotReady(ConversationState),

    #[error("a response is still streaming")]
    Busy,

    #[error("message is empty")]
    EmptyMessage,

    #[error("there is no reply to regenerate")]
    NothingToRegenerate,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything needed to start one completion session.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub stream_id: u64,
    pub conversation_id: ConversationId,
    pub messages: Vec<ChatMessage>,
    pub cancel_token: CancellationToken,
}

/// The outcome of feeding one stream message to the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// The message belonged to a session that is no longer current.
    Ignored,
    Delta(String),
    /// `saved` is true when the assistant turn was written to the store.
    Completed { saved: bool },
    Failed { error: StreamError, saved: bool },
}

/// Per-session bookkeeping; dropped when the session ends.
#[derive(Debug)]
struct ActiveStream {
    stream_id: u64,
    conversation_id: ConversationId,
    cancel_token: CancellationToken,
    accumulated: String,
}

pub struct Conversation {
    store: Arc<dyn PersistenceGateway>,
    options: ConversationOptions,
    state: ConversationState,
    conversation_id: Option<ConversationId>,
    title: String,
    transcript: Transcript,
    active: Option<ActiveStream>,
    last_stream_id: u64,
}

impl Conversation {
    pub fn new(store: Arc<dyn PersistenceGateway>, options: ConversationOptions) -> Self {
        Self {
            store,
            options,
            state: ConversationState::Idle,
            conversation_id: None,
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            transcript: Transcript::new(),
            active: None,
            last_stream_id: 0,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == ConversationState::Streaming
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn options(&self) -> &ConversationOptions {
        &self.options
    }

    pub fn active_stream_id(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.stream_id)
    }

    /// Resolves the conversation to work on and loads its turns.
    ///
    /// `None` creates a fresh conversation. On failure the machine returns to
    /// the state it was in and keeps its previous transcript.
    pub async fn open(
        &mut self,
        conversation_id: Option<ConversationId>,
    ) -> Result<ConversationId, ConversationError> {
        match self.state {
            ConversationState::Idle | ConversationState::Ready => {}
            ConversationState::Streaming => return Err(ConversationError::Busy),
            state => return Err(ConversationError::NotReady(state)),
        }

        let prior = self.state;
        self.state = ConversationState::Resolving;

        let resolved = match conversation_id {
            Some(id) => self.load(id).await,
            None => self.create().await,
        };

        match resolved {
            Ok((record, transcript)) => {
                info!(conversation = %record.id, turns = transcript.len(), "conversation ready");
                self.conversation_id = Some(record.id);
                self.title = record.title;
                self.transcript = transcript;
                self.state = ConversationState::Ready;
                Ok(record.id)
            }
            Err(err) => {
                self.state = prior;
                Err(err.into())
            }
        }
    }

    async fn load(&self, id: ConversationId) -> Result<(ConversationRecord, Transcript), StoreError> {
        let record = self.store.get_conversation(&id).await?;
        let messages = self.store.list_messages(&id).await?;
        let transcript =
            Transcript::from_messages(messages.iter().map(|message| message.to_message()).collect());
        Ok((record, transcript))
    }

    async fn create(&self) -> Result<(ConversationRecord, Transcript), StoreError> {
        let record = self.new_record();
        self.store.create_conversation(record.clone()).await?;
        Ok((record, Transcript::new()))
    }

    fn new_record(&self) -> ConversationRecord {
        ConversationRecord::new(
            ConversationId::generate(),
            DEFAULT_CONVERSATION_TITLE,
            self.options.owner.as_str(),
        )
    }

    fn require_ready(&self) -> Result<ConversationId, ConversationError> {
        match (self.state, self.conversation_id) {
            (ConversationState::Ready, Some(id)) => Ok(id),
            (ConversationState::Streaming, _) => Err(ConversationError::Busy),
            (state, _) => Err(ConversationError::NotReady(state)),
        }
    }

    /// Appends a user turn and starts a session over the whole transcript.
    pub async fn submit(&mut self, text: &str) -> Result<StreamRequest, ConversationError> {
        let conversation_id = self.require_ready()?;
        let content = text.trim();
        if content.is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        let mut turn = Message::user(content);
        turn.id = self
            .persist(conversation_id, TranscriptRole::User, content)
            .await;
        self.transcript.push(turn);

        Ok(self.begin_stream(conversation_id))
    }

    /// Replaces the trailing reply with a fresh one for the same prompt.
    pub async fn regenerate(&mut self) -> Result<StreamRequest, ConversationError> {
        let conversation_id = self.require_ready()?;
        if !self.transcript.ends_with_exchange() {
            return Err(ConversationError::NothingToRegenerate);
        }

        if let Some(superseded) = self.transcript.pop_trailing_assistant() {
            if let Some(message_id) = superseded.id {
                self.forget(conversation_id, message_id).await;
            }
        }

        Ok(self.begin_stream(conversation_id))
    }

    /// Abandons the current conversation for a fresh, empty one.
    ///
    /// Any in-flight session is cancelled. Recording the new conversation is
    /// optimistic: a failed write is logged and the machine is ready anyway.
    pub async fn reset(&mut self) -> ConversationId {
        self.abort_active();

        let record = self.new_record();
        let id = record.id;
        self.conversation_id = Some(id);
        self.title = record.title.clone();
        self.transcript.clear();
        self.state = ConversationState::Ready;

        if let Err(err) = self.store.create_conversation(record).await {
            warn!(conversation = %id, error = %err, "failed to record new conversation");
        }
        id
    }

    /// Cancels the in-flight session. Returns false when nothing was streaming.
    ///
    /// Partial text stays in the transcript and is only written when
    /// `persist_partial_responses` is set.
    pub async fn cancel(&mut self) -> bool {
        let Some(active) = self.abort_active() else {
            return false;
        };
        info!(stream_id = active.stream_id, "completion stream cancelled");
        self.state = ConversationState::Ready;
        self.settle_partial(&active).await;
        true
    }

    /// Applies one tagged message from the stream service.
    pub async fn handle_stream_message(
        &mut self,
        stream_id: u64,
        message: StreamMessage,
    ) -> StreamUpdate {
        let is_current = self.active.as_ref().is_some_and(|active| {
            active.stream_id == stream_id && Some(active.conversation_id) == self.conversation_id
        });
        if !is_current {
            debug!(stream_id, current = ?self.active_stream_id(), "ignoring stale stream message");
            return StreamUpdate::Ignored;
        }

        match message {
            StreamMessage::Chunk(text) => {
                if let Some(active) = self.active.as_mut() {
                    active.accumulated.push_str(&text);
                    self.transcript.upsert_assistant(&active.accumulated);
                }
                StreamUpdate::Delta(text)
            }
            StreamMessage::End => {
                let Some(active) = self.finish_active() else {
                    return StreamUpdate::Ignored;
                };
                if active.accumulated.is_empty() {
                    debug!(stream_id, "completion produced no text");
                    return StreamUpdate::Completed { saved: false };
                }
                let saved = self.save_reply(&active).await;
                StreamUpdate::Completed { saved }
            }
            StreamMessage::Error(error) => {
                let Some(active) = self.finish_active() else {
                    return StreamUpdate::Ignored;
                };
                let saved = self.settle_partial(&active).await;
                StreamUpdate::Failed { error, saved }
            }
        }
    }

    pub async fn rename(&mut self, title: &str) -> Result<(), ConversationError> {
        let Some(id) = self.conversation_id else {
            return Err(ConversationError::NotReady(self.state));
        };
        let title = normalize_title(title)?;
        self.store.rename_conversation(&id, &title).await?;
        self.title = title;
        Ok(())
    }

    /// Deletes a conversation; deleting the open one starts a fresh conversation.
    pub async fn delete(&mut self, id: ConversationId) -> Result<(), ConversationError> {
        self.store.delete_conversation(&id).await?;
        if self.conversation_id == Some(id) {
            self.reset().await;
        }
        Ok(())
    }

    /// This owner's conversations, most recently updated first, optionally
    /// filtered by title.
    pub async fn list(&self, search: Option<&str>) -> Result<Vec<ConversationRecord>, ConversationError> {
        let records = self.store.list_conversations(&self.options.owner).await?;
        Ok(match search {
            Some(query) => filter_by_title(records, query),
            None => records,
        })
    }

    fn begin_stream(&mut self, conversation_id: ConversationId) -> StreamRequest {
        self.abort_active();
        self.last_stream_id += 1;

        let cancel_token = CancellationToken::new();
        self.active = Some(ActiveStream {
            stream_id: self.last_stream_id,
            conversation_id,
            cancel_token: cancel_token.clone(),
            accumulated: String::new(),
        });
        self.state = ConversationState::Streaming;

        StreamRequest {
            stream_id: self.last_stream_id,
            conversation_id,
            messages: self.transcript.to_api_messages(),
            cancel_token,
        }
    }

    fn abort_active(&mut self) -> Option<ActiveStream> {
        let active = self.active.take()?;
        active.cancel_token.cancel();
        Some(active)
    }

    fn finish_active(&mut self) -> Option<ActiveStream> {
        let active = self.active.take()?;
        self.state = ConversationState::Ready;
        Some(active)
    }

    async fn settle_partial(&mut self, active: &ActiveStream) -> bool {
        if !self.options.persist_partial_responses || active.accumulated.is_empty() {
            return false;
        }
        self.save_reply(active).await
    }

    async fn save_reply(&mut self, active: &ActiveStream) -> bool {
        let id = self
            .persist(active.conversation_id, TranscriptRole::Assistant, &active.accumulated)
            .await;
        if Some(active.conversation_id) == self.conversation_id {
            if let Some(last) = self.transcript.last_mut().filter(|last| last.is_assistant()) {
                last.id = id;
            }
        }
        id.is_some()
    }

    async fn persist(
        &self,
        conversation_id: ConversationId,
        role: TranscriptRole,
        content: &str,
    ) -> Option<MessageId> {
        match self.store.append_message(&conversation_id, role, content).await {
            Ok(record) => Some(record.id),
            Err(err) => {
                warn!(conversation = %conversation_id, %role, error = %err, "failed to save message");
                None
            }
        }
    }

    async fn forget(&self, conversation_id: ConversationId, message_id: MessageId) {
        match self.store.delete_message(&conversation_id, &message_id).await {
            Ok(true) => {}
            Ok(false) => debug!(conversation = %conversation_id, message = %message_id, "superseded reply was already gone"),
            Err(err) => warn!(conversation = %conversation_id, message = %message_id, error = %err, "failed to delete superseded reply"),
        }
    }
}

#[cfg(test)]
mod tests;
