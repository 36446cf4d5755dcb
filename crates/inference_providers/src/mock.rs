//! Mock implementation of InferenceProvider for testing
//!
//! Generates scripted delta streams without requiring an external backend.
//! Turns are enqueued ahead of time; each `complete` call consumes the next
//! one, falling back to the default template when the queue is empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::models::{
    ChatCompletionParams, CompletionError, FinishReason, MessageRole, StreamDelta, TokenUsage,
};
use crate::{InferenceProvider, StreamingResult};

/// Template for one scripted model turn
#[derive(Debug, Clone, Default)]
pub struct TurnTemplate {
    content: Option<String>,
    reasoning: Option<String>,
    refusal: Option<String>,
    tool_calls: Vec<(String, String)>,
    stream_error: Option<String>,
}

impl TurnTemplate {
    /// A turn that streams the given text content
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A turn that requests a single tool call
    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::default().with_tool_call(name, arguments)
    }

    /// A turn whose message content is a refusal
    pub fn refusal(refusal: impl Into<String>) -> Self {
        Self {
            refusal: Some(refusal.into()),
            ..Self::default()
        }
    }

    /// Add reasoning content streamed before the message text
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Add a requested tool call to this turn
    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        self.tool_calls.push((name.into(), arguments.to_string()));
        self
    }

    /// End the stream with the given error instead of a final `TurnDone`
    pub fn with_stream_error(mut self, message: impl Into<String>) -> Self {
        self.stream_error = Some(message.into());
        self
    }

    /// Expand this template into the delta sequence a backend would emit
    fn generate_deltas(&self, prompt_tokens: i32) -> Vec<Result<StreamDelta, CompletionError>> {
        let mut deltas = Vec::new();
        let mut completion_tokens = 0;

        if self.content.is_some() || self.reasoning.is_some() || self.refusal.is_some() {
            deltas.push(Ok(StreamDelta::MessageStart {
                role: MessageRole::Assistant,
            }));
        }

        if let Some(reasoning) = &self.reasoning {
            for chunk in split_chunks(reasoning) {
                deltas.push(Ok(StreamDelta::ReasoningDelta {
                    text: chunk.to_string(),
                }));
                completion_tokens += 1;
            }
        }

        if let Some(refusal) = &self.refusal {
            for chunk in split_chunks(refusal) {
                deltas.push(Ok(StreamDelta::RefusalDelta {
                    text: chunk.to_string(),
                }));
                completion_tokens += 1;
            }
        }

        if let Some(content) = &self.content {
            for chunk in split_chunks(content) {
                deltas.push(Ok(StreamDelta::TextDelta {
                    text: chunk.to_string(),
                }));
                completion_tokens += 1;
            }
            deltas.push(Ok(StreamDelta::TextDone {
                text: content.clone(),
            }));
        }

        for (index, (name, arguments)) in self.tool_calls.iter().enumerate() {
            deltas.push(Ok(StreamDelta::ToolCallStart {
                index,
                id: Some(format!("call_{index}")),
                name: name.clone(),
            }));
            // Arguments arrive in two fragments, mirroring real providers
            let split_at = arguments.len() / 2;
            let (head, tail) = arguments.split_at(split_at);
            for fragment in [head, tail] {
                if !fragment.is_empty() {
                    deltas.push(Ok(StreamDelta::ToolCallArgsDelta {
                        index,
                        delta: fragment.to_string(),
                    }));
                }
            }
            deltas.push(Ok(StreamDelta::ToolCallArgsDone {
                index,
                arguments: arguments.clone(),
            }));
            completion_tokens += 1;
        }

        if let Some(message) = &self.stream_error {
            deltas.push(Err(CompletionError::CompletionError(message.clone())));
            return deltas;
        }

        let finish_reason = if self.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        deltas.push(Ok(StreamDelta::TurnDone {
            finish_reason,
            usage: Some(TokenUsage::new(prompt_tokens, completion_tokens)),
        }));

        deltas
    }
}

/// Split text into word-sized chunks, preserving whitespace
fn split_chunks(text: &str) -> Vec<&str> {
    let chunks: Vec<&str> = text.split_inclusive(' ').collect();
    if chunks.is_empty() {
        vec![text]
    } else {
        chunks
    }
}

pub struct MockProvider {
    turns: Mutex<VecDeque<TurnTemplate>>,
    default_turn: Mutex<TurnTemplate>,
    valid_models: Mutex<Option<Vec<String>>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            default_turn: Mutex::new(TurnTemplate::text("This is a mock response.")),
            valid_models: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Restrict the provider to the given model ids; completions against any
    /// other model fail the way a real backend reports a missing model.
    pub fn with_models(models: Vec<impl Into<String>>) -> Self {
        let provider = Self::new();
        *provider.valid_models.lock().unwrap() =
            Some(models.into_iter().map(Into::into).collect());
        provider
    }

    /// Queue the next scripted turn
    pub fn enqueue(&self, turn: TurnTemplate) {
        self.turns.lock().unwrap().push_back(turn);
    }

    /// Set the template used when the turn queue is empty
    pub fn set_default_turn(&self, turn: TurnTemplate) {
        *self.default_turn.lock().unwrap() = turn;
    }

    /// Number of completion calls made against this provider
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn is_valid_model(&self, model: &str) -> bool {
        match &*self.valid_models.lock().unwrap() {
            Some(models) => models.iter().any(|m| m == model),
            None => true,
        }
    }

    fn estimate_prompt_tokens(params: &ChatCompletionParams) -> i32 {
        params
            .messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .map(|c| c.split_whitespace().count() as i32)
            .sum::<i32>()
            .max(1)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    async fn complete(
        &self,
        params: ChatCompletionParams,
    ) -> Result<StreamingResult, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_valid_model(&params.model) {
            return Err(CompletionError::CompletionError(format!(
                "model '{}' not found",
                params.model
            )));
        }

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_turn.lock().unwrap().clone());

        tracing::debug!(
            model = %params.model,
            messages = params.messages.len(),
            "Mock provider serving scripted turn"
        );

        let deltas = turn.generate_deltas(Self::estimate_prompt_tokens(&params));
        Ok(Box::pin(stream::iter(deltas)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn params(model: &str, prompt: &str) -> ChatCompletionParams {
        ChatCompletionParams {
            model: model.to_string(),
            messages: vec![crate::ChatMessage::text(MessageRole::User, prompt)],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: Some(true),
            response_format: None,
            tools: None,
            tool_choice: None,
        }
    }

    async fn collect(stream: StreamingResult) -> Vec<Result<StreamDelta, CompletionError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_text_turn_deltas_concatenate() {
        let provider = MockProvider::new();
        provider.enqueue(TurnTemplate::text("Hello world from the mock"));

        let stream = provider.complete(params("test-model", "Hello")).await.unwrap();
        let deltas = collect(stream).await;

        let mut text = String::new();
        let mut saw_turn_done = false;
        for delta in &deltas {
            match delta.as_ref().unwrap() {
                StreamDelta::TextDelta { text: t } => text.push_str(t),
                StreamDelta::TextDone { text: full } => {
                    assert_eq!(full, "Hello world from the mock");
                }
                StreamDelta::TurnDone { finish_reason, usage } => {
                    saw_turn_done = true;
                    assert_eq!(*finish_reason, FinishReason::Stop);
                    assert!(usage.as_ref().unwrap().completion_tokens > 0);
                }
                _ => {}
            }
        }
        assert_eq!(text, "Hello world from the mock");
        assert!(saw_turn_done);
    }

    #[tokio::test]
    async fn test_tool_call_turn_reassembles_arguments() {
        let provider = MockProvider::new();
        provider.enqueue(TurnTemplate::tool_call(
            "get_weather",
            serde_json::json!({"location": "Paris"}),
        ));

        let stream = provider.complete(params("test-model", "weather?")).await.unwrap();
        let deltas = collect(stream).await;

        let mut args = String::new();
        let mut name = String::new();
        let mut finish = None;
        for delta in &deltas {
            match delta.as_ref().unwrap() {
                StreamDelta::ToolCallStart { name: n, .. } => name = n.clone(),
                StreamDelta::ToolCallArgsDelta { delta, .. } => args.push_str(delta),
                StreamDelta::ToolCallArgsDone { arguments, .. } => {
                    assert_eq!(&args, arguments);
                }
                StreamDelta::TurnDone { finish_reason, .. } => finish = Some(*finish_reason),
                _ => {}
            }
        }
        assert_eq!(name, "get_weather");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&args).unwrap()["location"],
            "Paris"
        );
        assert_eq!(finish, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn test_unknown_model_fails_up_front() {
        let provider = MockProvider::with_models(vec!["known-model"]);
        let result = provider.complete(params("missing-model", "hi")).await;
        match result {
            Err(CompletionError::CompletionError(message)) => {
                assert!(message.contains("model 'missing-model' not found"));
            }
            Err(other) => panic!("Expected completion error, got: {other:?}"),
            Ok(_) => panic!("Expected completion error, got Ok stream"),
        }
    }

    #[tokio::test]
    async fn test_stream_error_ends_stream() {
        let provider = MockProvider::new();
        provider.enqueue(TurnTemplate::text("partial").with_stream_error("backend exploded"));

        let stream = provider.complete(params("test-model", "hi")).await.unwrap();
        let deltas = collect(stream).await;

        assert!(deltas.last().unwrap().is_err());
        assert!(!deltas
            .iter()
            .any(|d| matches!(d, Ok(StreamDelta::TurnDone { .. }))));
    }

    #[tokio::test]
    async fn test_call_count_tracks_completions() {
        let provider = MockProvider::new();
        assert_eq!(provider.call_count(), 0);
        let _ = provider.complete(params("m", "a")).await.unwrap();
        let _ = provider.complete(params("m", "b")).await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }
}
