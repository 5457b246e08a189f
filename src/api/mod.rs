use serde::{Deserialize, Serialize};

/// One role-tagged message as sent to the completion endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ChatRequest {
    /// Builds the request body. OpenAI-compatible endpoints need the model and
    /// an explicit `stream` flag; a bare proxy endpoint takes only `messages`.
    pub fn new(messages: Vec<ChatMessage>, model: Option<String>) -> Self {
        let stream = model.as_ref().map(|_| true);
        Self {
            messages,
            model,
            stream,
        }
    }
}
