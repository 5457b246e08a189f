pub mod chat_stream;
pub mod completion;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod event_parser;
pub mod frame_decoder;
pub mod message;
pub mod runtime;
