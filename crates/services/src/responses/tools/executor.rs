//! Tool Executor Framework
//!
//! Trait-based abstraction for tool execution: each tool family implements
//! [`ToolExecutor`], and the [`ToolRegistry`] dispatches calls to the first
//! executor that can handle the tool name.

use std::sync::Arc;

use async_trait::async_trait;

use crate::responses::errors::ResponseError;
use crate::responses::models::FileSearchResult;
use crate::responses::tools::ports::WebSearchResult;

/// A model-requested tool call, with its argument payload already parsed.
#[derive(Debug, Clone)]
pub struct ToolCallInfo {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCallInfo {
    /// Parse a raw argument string into a call. An empty payload means "no
    /// arguments"; anything else must be valid JSON, otherwise the call is
    /// scoped-failed without reaching an executor.
    pub fn parse(
        call_id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: &str,
    ) -> Result<Self, ResponseError> {
        let arguments = if raw_arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(raw_arguments).map_err(|e| {
                ResponseError::InvalidParams(format!("Malformed tool arguments: {e}"))
            })?
        };
        Ok(Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        })
    }

    /// The "query" argument shared by the search tool families
    pub fn query(&self) -> Option<&str> {
        self.arguments.get("query").and_then(|v| v.as_str())
    }
}

/// Output from tool execution.
///
/// Each variant carries the data specific to that tool family; the
/// orchestrator pattern-matches on this to fill output items and fold the
/// result back into the message buffer.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Plain text response (function tools, MCP tools)
    Text(String),
    /// Web search results with structured source data
    WebSearch { sources: Vec<WebSearchResult> },
    /// File search results with structured data
    FileSearch { results: Vec<FileSearchResult> },
}

impl ToolOutput {
    /// Render this output as the text folded back to the model
    pub fn to_model_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::WebSearch { sources } => sources
                .iter()
                .map(|r| format!("Title: {}\nURL: {}\nSnippet: {}\n", r.title, r.url, r.snippet))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::FileSearch { results } => results
                .iter()
                .map(|r| {
                    format!(
                        "File: {}\nContent: {}\nRelevance: {}\n",
                        r.file_name, r.content, r.relevance_score
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Trait for tool executors.
///
/// Executors are stateless with respect to the response: they receive the
/// parsed call and return a typed [`ToolOutput`] or a scoped error. Event
/// emission and result folding stay in the orchestrator, which owns
/// client-visible ordering.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Name of this executor (for logging)
    fn name(&self) -> &str;

    /// Check if this executor can handle the given tool name
    fn can_handle(&self, tool_name: &str) -> bool;

    /// Execute the tool with the given parameters
    async fn execute(&self, tool_call: &ToolCallInfo) -> Result<ToolOutput, ResponseError>;
}

/// Registry for tool executors.
pub struct ToolRegistry {
    executors: Vec<Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
        }
    }

    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) {
        self.executors.push(executor);
    }

    pub fn can_handle(&self, tool_name: &str) -> bool {
        self.executors.iter().any(|e| e.can_handle(tool_name))
    }

    /// Execute a tool call with the first executor that can handle it.
    pub async fn execute(&self, tool_call: &ToolCallInfo) -> Result<ToolOutput, ResponseError> {
        if tool_call.name.trim().is_empty() {
            return Err(ResponseError::EmptyToolName);
        }

        for executor in &self.executors {
            if executor.can_handle(&tool_call.name) {
                tracing::debug!(
                    executor = executor.name(),
                    tool = %tool_call.name,
                    "Dispatching tool call"
                );
                return executor.execute(tool_call).await;
            }
        }

        Err(ResponseError::UnknownTool(tool_call.name.clone()))
    }

    /// Convert a scoped tool error into the text folded back to the model.
    /// The error stays on that call's output item; the response continues.
    pub fn error_output(error: &ResponseError, tool_call: &ToolCallInfo) -> ToolOutput {
        tracing::warn!(
            tool = %tool_call.name,
            error = %error,
            "Tool failed, feeding error back to the model"
        );
        ToolOutput::Text(format!("ERROR: {error}"))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
