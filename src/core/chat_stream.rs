//! Drives one completion request from raw bytes to ordered text deltas.
//!
//! [`StreamSession`] owns the decode buffer and the rejoin slot for a single
//! request and is discarded when the request ends. [`run_stream`] pumps a
//! byte stream through it, and [`ChatStreamService`] runs sessions on tokio,
//! reporting each one as a tagged sequence of [`StreamMessage`]s: zero or more
//! `Chunk`s followed by exactly one `End` or `Error`. A cancelled session
//! reports nothing further.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ChatMessage;
use crate::core::completion::{CompletionGateway, StreamError};
use crate::core::constants::DATA_PREFIX;
use crate::core::event_parser::{extract_data_payload, is_comment, parse_line, parse_payload, FrameEvent};
use crate::core::frame_decoder::FrameDecoder;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Chunk(String),
    Error(StreamError),
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStep {
    Continue,
    Terminated,
}

/// How a successful session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    Sentinel,
    EndOfStream,
}

#[derive(Debug, Default)]
pub struct StreamSession {
    decoder: FrameDecoder,
    /// Payload of a data frame that failed to parse, waiting for its continuation.
    held: Option<String>,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and delivers every delta it completes, in order.
    pub fn feed<F>(&mut self, chunk: &[u8], on_delta: &mut F) -> Result<StreamStep, StreamError>
    where
        F: FnMut(String),
    {
        self.decoder.push(chunk);
        while let Some(line) = self.decoder.next_line() {
            if self.handle_line(&line, on_delta)? == StreamStep::Terminated {
                return Ok(StreamStep::Terminated);
            }
        }
        Ok(StreamStep::Continue)
    }

    /// Flushes the decoder after the body ended without a sentinel.
    pub fn finish<F>(&mut self, on_delta: &mut F) -> Result<StreamStep, StreamError>
    where
        F: FnMut(String),
    {
        for line in self.decoder.finish() {
            if self.handle_line(&line, on_delta)? == StreamStep::Terminated {
                return Ok(StreamStep::Terminated);
            }
        }
        if let Some(held) = self.held.take() {
            debug!(payload = %held, "dropping malformed frame at end of stream");
        }
        Ok(StreamStep::Continue)
    }

    fn handle_line<F>(&mut self, line: &str, on_delta: &mut F) -> Result<StreamStep, StreamError>
    where
        F: FnMut(String),
    {
        if let Some(held) = self.held.take() {
            if line.trim().is_empty() {
                self.held = Some(held);
                return Ok(StreamStep::Continue);
            }

            if extract_data_payload(line).is_some() {
                debug!(payload = %held, "dropping malformed frame superseded by a new frame");
            } else {
                // A continuation may itself start with ':' (whitespace before a JSON colon),
                // so a comment-looking line is only a keep-alive when the join still fails.
                let joined = format!("{held}{line}");
                return match parse_payload(joined.trim()) {
                    FrameEvent::Malformed(_) if is_comment(line) => {
                        self.held = Some(held);
                        Ok(StreamStep::Continue)
                    }
                    FrameEvent::Malformed(_) => {
                        debug!(payload = %joined, "dropping malformed frame after rejoin");
                        Ok(StreamStep::Continue)
                    }
                    event => self.apply(event, line, on_delta),
                };
            }
        }

        let event = parse_line(line);
        self.apply(event, line, on_delta)
    }

    fn apply<F>(&mut self, event: FrameEvent, line: &str, on_delta: &mut F) -> Result<StreamStep, StreamError>
    where
        F: FnMut(String),
    {
        match event {
            FrameEvent::Ignore => Ok(StreamStep::Continue),
            FrameEvent::Terminate => Ok(StreamStep::Terminated),
            FrameEvent::Delta(text) => {
                on_delta(text);
                Ok(StreamStep::Continue)
            }
            FrameEvent::ApiError(message) => Err(StreamError::Api(message)),
            FrameEvent::Malformed(_) => {
                // Keep the payload untrimmed on the right: the break may fall inside a string.
                let payload = line
                    .strip_prefix(DATA_PREFIX)
                    .map(str::trim_start)
                    .unwrap_or(line);
                self.held = Some(payload.to_string());
                Ok(StreamStep::Continue)
            }
        }
    }
}

/// Consumes `body` to completion, calling `on_delta` for each text fragment.
///
/// Returns once the sentinel is seen or the body ends. A read error or an API
/// error frame ends the session with that error; cancellation is checked
/// before every read.
pub async fn run_stream<S, F>(
    mut body: S,
    cancel_token: &CancellationToken,
    mut on_delta: F,
) -> Result<StreamEnd, StreamError>
where
    S: Stream<Item = Result<Bytes, StreamError>> + Unpin,
    F: FnMut(String),
{
    let mut session = StreamSession::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(StreamError::Cancelled),
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if session.feed(&chunk, &mut on_delta)? == StreamStep::Terminated {
                    return Ok(StreamEnd::Sentinel);
                }
            }
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }

    match session.finish(&mut on_delta)? {
        StreamStep::Terminated => Ok(StreamEnd::Sentinel),
        StreamStep::Continue => Ok(StreamEnd::EndOfStream),
    }
}

pub struct StreamParams {
    pub gateway: Arc<dyn CompletionGateway>,
    pub messages: Vec<ChatMessage>,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                gateway,
                messages,
                cancel_token,
                stream_id,
            } = params;

            tokio::select! {
                _ = async {
                    let body = match gateway.open_stream(messages).await {
                        Ok(body) => body,
                        Err(err) => {
                            info!(stream_id, error = %err, "completion stream failed to open");
                            let _ = tx.send((StreamMessage::Error(err), stream_id));
                            return;
                        }
                    };

                    let result = run_stream(body, &cancel_token, |text| {
                        let _ = tx.send((StreamMessage::Chunk(text), stream_id));
                    })
                    .await;

                    match result {
                        Ok(end) => {
                            debug!(stream_id, ?end, "completion stream finished");
                            let _ = tx.send((StreamMessage::End, stream_id));
                        }
                        Err(StreamError::Cancelled) => {
                            debug!(stream_id, "completion stream cancelled");
                        }
                        Err(err) => {
                            info!(stream_id, error = %err, "completion stream failed");
                            let _ = tx.send((StreamMessage::Error(err), stream_id));
                        }
                    }
                } => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "completion stream cancelled");
                }
            }
        })
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}
