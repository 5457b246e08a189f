//! Relaychat is a terminal client that streams chat completions from an
//! OpenAI-compatible endpoint and keeps conversations on disk.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the streaming pipeline (frame decoding, event parsing,
//!   the stream service) and the conversation state machine that turns
//!   deltas into transcript turns.
//! - [`store`] defines the persistence seam with in-memory and file-backed
//!   implementations.
//! - [`api`] defines the request payloads sent to the completion endpoint.
//! - [`cli`] is the command-line front end that drives the state machine.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod store;
pub mod utils;
