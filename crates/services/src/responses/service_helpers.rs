//! Helper structures for the response service
//!
//! This module groups the per-stream state and the event sending path so the
//! orchestrator code stays focused on loop control.

use futures::channel::mpsc::UnboundedSender;
use inference_providers::TokenUsage;

use crate::responses::errors::ResponseError;
use crate::responses::models::{ResponseStreamEvent, Usage};

/// Context for processing a response stream.
///
/// Owns the response-global sequence counter and output-index allocation;
/// both are only ever touched by the single orchestrator driving the
/// response.
pub struct ResponseStreamContext {
    pub response_id: String,
    sequence_number: u64,
    next_output_index: usize,
    pub usage: Usage,
}

impl ResponseStreamContext {
    pub fn new(response_id: String) -> Self {
        Self {
            response_id,
            sequence_number: 0,
            next_output_index: 0,
            usage: Usage::default(),
        }
    }

    /// Allocate the next sequence number. The first call returns 1; numbers
    /// are strictly increasing with no gaps.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence_number += 1;
        self.sequence_number
    }

    /// Allocate the next output index. Indices are assigned in emission
    /// order and never reused.
    pub fn next_output_index(&mut self) -> usize {
        let index = self.next_output_index;
        self.next_output_index += 1;
        index
    }

    /// Fold usage from one completion round into the response total
    pub fn add_usage(&mut self, usage: &TokenUsage) {
        self.usage.add(usage);
    }
}

/// Sends stream events and enforces the single-terminal-event invariant.
pub struct EventEmitter {
    tx: UnboundedSender<ResponseStreamEvent>,
    terminal_sent: bool,
}

impl EventEmitter {
    pub fn new(tx: UnboundedSender<ResponseStreamEvent>) -> Self {
        Self {
            tx,
            terminal_sent: false,
        }
    }

    /// Send an event to the stream.
    ///
    /// A second terminal event is an implementation bug and fails loudly. A
    /// disconnected consumer is not an error: the driving task must still
    /// finalize and persist, so sends after abandonment are dropped.
    pub fn send(&mut self, event: ResponseStreamEvent) -> Result<(), ResponseError> {
        if event.is_terminal() {
            if self.terminal_sent {
                return Err(ResponseError::InvariantViolation(format!(
                    "second terminal event {:?} for one response",
                    event.sequence_number()
                )));
            }
            self.terminal_sent = true;
        }

        if self.tx.unbounded_send(event).is_err() {
            tracing::debug!("Event consumer disconnected; continuing to finalize");
        }
        Ok(())
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent
    }
}
