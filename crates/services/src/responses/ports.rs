use async_trait::async_trait;
use inference_providers::ChatMessage;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::responses::models::{
    ListResponsesPage, Order, ResponseInputItem, ResponseObject,
};

/// A terminal response as persisted: the response itself, the input-item
/// list it originated from, and the raw provider messages used to produce
/// it. Retaining the messages avoids reconversion drift on chained turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub response: ResponseObject,
    pub input: Vec<ResponseInputItem>,
    pub messages: Vec<ChatMessage>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseRepositoryTrait: Send + Sync {
    async fn put(&self, stored: StoredResponse) -> anyhow::Result<()>;

    async fn get(&self, response_id: &str) -> anyhow::Result<Option<StoredResponse>>;

    async fn list(
        &self,
        after: Option<String>,
        limit: usize,
        model: Option<String>,
        order: Order,
    ) -> anyhow::Result<ListResponsesPage>;

    async fn delete(&self, response_id: &str) -> anyhow::Result<bool>;
}

/// A violation reported by a safety check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub check_id: String,
    pub message: String,
}

/// Result of a moderation call over raw text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,
    pub categories: Vec<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SafetyProviderTrait: Send + Sync {
    /// Check identifiers this backend knows how to run
    async fn list_checks(&self) -> Vec<String>;

    /// Run one named check over a message list
    async fn run_check(
        &self,
        check_id: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<Option<SafetyViolation>>;

    /// Run the moderation model over raw text
    async fn run_moderation(&self, text: &str) -> anyhow::Result<ModerationResult>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolRuntimeError {
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Tool not registered: {0}")]
    NotRegistered(String),
}

/// Execution backend for client-declared function tools
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolRuntimeTrait: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolRuntimeError>;
}
