//! The adapter contract every dialect implements.

use std::time::Instant;

use serde_json::Value;

use crate::error::Result;
use crate::ir::{CoreRequest, CoreResponse, Provider, StreamEvent, StreamPayload};

/// A dialect translator.
///
/// The document operations are pure; the stream operations are stateful and
/// scoped to one session (one live stream). An adapter instance therefore
/// serves exactly one session at a time, and [`reset_stream_state`] returns
/// it to a fresh state.
///
/// Stream operations return vectors because dialects disagree on event
/// granularity: an OpenAI finish chunk closes every open block and ends the
/// stream in one wire event, and re-emitting to Anthropic synthesises
/// `message_start`/`content_block_start` events the source never sent.
///
/// Adapters never mutate their input and never block internally.
///
/// [`reset_stream_state`]: DialectAdapter::reset_stream_state
pub trait DialectAdapter: Send + std::fmt::Debug {
    /// The dialect this adapter translates.
    fn provider(&self) -> Provider;

    /// Parse a dialect request document into the neutral representation.
    fn to_unified_request(&self, doc: &Value) -> Result<CoreRequest>;

    /// Render a neutral request in this dialect.
    fn from_unified_request(&self, request: &CoreRequest) -> Result<Value>;

    /// Parse a dialect response document into the neutral representation.
    fn to_unified_response(&self, doc: &Value) -> Result<CoreResponse>;

    /// Render a neutral response in this dialect.
    fn from_unified_response(&self, response: &CoreResponse) -> Result<Value>;

    /// Translate one inbound wire event into neutral stream events,
    /// advancing session state (sequence ids, timestamps, open blocks).
    fn to_unified_stream_event(&mut self, doc: &Value) -> Result<Vec<StreamEvent>>;

    /// Translate one neutral stream event into this dialect's wire events,
    /// advancing session state.
    fn from_unified_stream_event(&mut self, event: &StreamEvent) -> Result<Vec<Value>>;

    /// Zero the sequence counter, forget the session start time, and drop
    /// all per-session index and id bookkeeping.
    fn reset_stream_state(&mut self);
}

/// Per-session sequence and timing bookkeeping shared by all adapters.
///
/// Sequence ids start at 0 and increase by one per emitted event; timestamps
/// are seconds since the first event of the session, so they are non-negative
/// and non-decreasing by construction.
#[derive(Debug, Default)]
pub struct StreamCursor {
    sequence_id: u64,
    started_at: Option<Instant>,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a payload with the next sequence id and the session-relative
    /// timestamp, starting the session clock on first use.
    pub fn stamp(&mut self, payload: StreamPayload) -> StreamEvent {
        let sequence_id = self.sequence_id;
        self.sequence_id += 1;

        let started_at = *self.started_at.get_or_insert_with(Instant::now);
        let timestamp = started_at.elapsed().as_secs_f64();

        StreamEvent {
            sequence_id,
            timestamp,
            payload,
        }
    }

    /// Stamp every payload in order.
    pub fn stamp_all(&mut self, payloads: Vec<StreamPayload>) -> Vec<StreamEvent> {
        payloads.into_iter().map(|payload| self.stamp(payload)).collect()
    }

    pub fn reset(&mut self) {
        self.sequence_id = 0;
        self.started_at = None;
    }
}
