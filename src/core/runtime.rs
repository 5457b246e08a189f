//! Wires a [`Conversation`] to a completion gateway.
//!
//! The runtime owns the receiving end of the stream service channel and is the
//! only place stream messages are fed back into the conversation, so every
//! transcript mutation happens on the task that drives the runtime.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams};
use crate::core::completion::CompletionGateway;
use crate::core::conversation::{Conversation, ConversationError, StreamRequest, StreamUpdate};
use crate::core::message::ConversationId;

pub struct ChatRuntime {
    conversation: Conversation,
    gateway: Arc<dyn CompletionGateway>,
    service: ChatStreamService,
    rx: mpsc::UnboundedReceiver<(StreamMessage, u64)>,
}

impl ChatRuntime {
    pub fn new(conversation: Conversation, gateway: Arc<dyn CompletionGateway>) -> Self {
        let (service, rx) = ChatStreamService::new();
        Self {
            conversation,
            gateway,
            service,
            rx,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub async fn open(
        &mut self,
        conversation_id: Option<ConversationId>,
    ) -> Result<ConversationId, ConversationError> {
        self.conversation.open(conversation_id).await
    }

    /// Submits `text` and starts streaming the reply. Returns the session id.
    pub async fn submit(&mut self, text: &str) -> Result<u64, ConversationError> {
        let request = self.conversation.submit(text).await?;
        Ok(self.spawn(request))
    }

    pub async fn regenerate(&mut self) -> Result<u64, ConversationError> {
        let request = self.conversation.regenerate().await?;
        Ok(self.spawn(request))
    }

    pub async fn reset(&mut self) -> ConversationId {
        self.conversation.reset().await
    }

    pub async fn cancel(&mut self) -> bool {
        self.conversation.cancel().await
    }

    fn spawn(&self, request: StreamRequest) -> u64 {
        let stream_id = request.stream_id;
        self.service.spawn_stream(StreamParams {
            gateway: Arc::clone(&self.gateway),
            messages: request.messages,
            cancel_token: request.cancel_token,
            stream_id,
        });
        stream_id
    }

    /// Waits for the next tagged stream message without applying it.
    ///
    /// Cancel-safe: dropping the future loses no message. Returns `None` when
    /// no session is streaming.
    pub async fn recv(&mut self) -> Option<(StreamMessage, u64)> {
        if !self.conversation.is_streaming() {
            return None;
        }
        self.rx.recv().await
    }

    /// Applies a message from [`ChatRuntime::recv`]. Must run to completion:
    /// finishing a session persists the reply.
    pub async fn apply(&mut self, message: StreamMessage, stream_id: u64) -> StreamUpdate {
        self.conversation.handle_stream_message(stream_id, message).await
    }

    /// Waits for the next stream message and applies it.
    ///
    /// Returns `None` when no session is streaming.
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        let (message, stream_id) = self.recv().await?;
        Some(self.apply(message, stream_id).await)
    }

    /// Drives the current session to its end, passing each delta to `on_delta`.
    pub async fn wait_until_ready<F>(&mut self, mut on_delta: F) -> Option<StreamUpdate>
    where
        F: FnMut(&str),
    {
        while let Some(update) = self.next_update().await {
            match update {
                StreamUpdate::Ignored => {}
                StreamUpdate::Delta(text) => on_delta(&text),
                finished => return Some(finished),
            }
        }
        None
    }
}
