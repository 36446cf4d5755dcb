//! Inference provider interface for the responses engine
//!
//! This crate defines a streaming-first trait boundary to model-inference
//! backends. All completions return an ordered stream of [`StreamDelta`]
//! values rather than complete responses:
//!
//! - **Consistent API**: streaming and blocking callers share one path
//! - **Real-time UX**: deltas are surfaced as they arrive
//! - **Typed deltas**: consumers match on a closed variant set instead of
//!   re-parsing provider wire formats
//!
//! The [`MockProvider`] generates scripted delta streams for tests without
//! requiring an external backend.

pub mod mock;
pub mod models;

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

pub use mock::{MockProvider, TurnTemplate};
pub use models::{
    ChatCompletionParams, ChatMessage, CompletionError, FinishReason, FunctionCall,
    FunctionChoice, FunctionDefinition, JsonSchema, MessageRole, ResponseFormat, StreamDelta,
    TokenUsage, ToolCall, ToolChoice, ToolDefinition,
};

/// Type alias for streaming completion results
pub type StreamingResult = Pin<Box<dyn Stream<Item = Result<StreamDelta, CompletionError>> + Send>>;

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Performs a streaming chat completion request.
    ///
    /// Returns an ordered stream of [`StreamDelta`] values. The stream is
    /// finite: a well-behaved backend ends it with a `TurnDone` delta, and a
    /// mid-stream failure surfaces as an `Err` item.
    async fn complete(&self, params: ChatCompletionParams)
        -> Result<StreamingResult, CompletionError>;
}
