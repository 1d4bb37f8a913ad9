//! # SSE Parser
//!
//! Turns a chunked `text/event-stream` body into framed events.
//!
//! - Line buffering across chunk boundaries (`\n` or `\r\n`)
//! - `event:` and `data:` fields, multi-line data joined with `\n`
//! - Comment lines (`:`) and unknown fields (`id:`, `retry:`) ignored
//! - A blank line dispatches; an event without data is dropped
//! - A read error is yielded once, then the stream ends

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use pulse_core::TransportError;
use tracing::warn;

/// Event name used when the server omits `event:`.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name (`message` when absent).
    pub event: String,
    /// Data payload.
    pub data: String,
}

impl SseEvent {
    /// Build an event.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data: Vec<String>,
}

impl PendingEvent {
    /// Feed one line; returns an event when the line completes one.
    fn feed(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }

    fn take(&mut self) -> Option<SseEvent> {
        let pending = std::mem::take(self);
        if pending.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: pending
                .event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
            data: pending.data.join("\n"),
        })
    }
}

struct ParserState<S> {
    stream: S,
    buffer: BytesMut,
    pending: PendingEvent,
    done: bool,
}

/// Parse SSE events from a byte stream.
pub fn parse_sse_events<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, TransportError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<TransportError> + Send,
{
    let state = ParserState {
        stream: byte_stream,
        buffer: BytesMut::with_capacity(8192),
        pending: PendingEvent::default(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        loop {
            if let Some(newline_pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let mut line_bytes = state.buffer.split_to(newline_pos + 1);
                line_bytes.truncate(line_bytes.len() - 1);
                if line_bytes.last() == Some(&b'\r') {
                    line_bytes.truncate(line_bytes.len() - 1);
                }

                let Ok(line) = std::str::from_utf8(&line_bytes) else {
                    continue;
                };
                if let Some(event) = state.pending.feed(line) {
                    return Some((Ok(event), state));
                }
                continue;
            }

            match state.stream.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    let err: TransportError = e.into();
                    warn!(error = %err, "SSE stream read error");
                    state.done = true;
                    return Some((Err(err), state));
                }
                None => {
                    // Flush an unterminated trailing line, then any pending event.
                    let tail = std::str::from_utf8(&state.buffer).map(str::to_owned);
                    state.buffer.clear();
                    if let Ok(tail) = tail {
                        let _ = state.pending.feed(tail.trim_end_matches('\r'));
                    }
                    state.done = true;
                    let event = state.pending.take()?;
                    return Some((Ok(event), state));
                }
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
