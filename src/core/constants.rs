//! Shared constants used across the application

/// Prefix of a data frame. Whitespace after the colon is optional.
pub const DATA_PREFIX: &str = "data:";

/// Lines starting with this marker are framing comments (keep-alives).
pub const COMMENT_MARKER: char = ':';

/// Payload that terminates a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Title given to freshly created conversations.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

/// Owner recorded on conversations when none is configured.
pub const DEFAULT_OWNER: &str = "local";
