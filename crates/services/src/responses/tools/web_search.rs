//! Executor for the built-in web_search tool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::responses::errors::ResponseError;
use crate::responses::tools::ports::WebSearchProviderTrait;

use super::executor::{ToolCallInfo, ToolExecutor, ToolOutput};

pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

pub struct WebSearchToolExecutor {
    provider: Arc<dyn WebSearchProviderTrait>,
}

impl WebSearchToolExecutor {
    pub fn new(provider: Arc<dyn WebSearchProviderTrait>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ToolExecutor for WebSearchToolExecutor {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL_NAME
    }

    fn can_handle(&self, tool_name: &str) -> bool {
        tool_name == WEB_SEARCH_TOOL_NAME
    }

    async fn execute(&self, tool_call: &ToolCallInfo) -> Result<ToolOutput, ResponseError> {
        let query = tool_call.query().ok_or_else(|| {
            ResponseError::InvalidParams("web_search requires a 'query' argument".to_string())
        })?;

        let sources = self
            .provider
            .search(query)
            .await
            .map_err(|e| ResponseError::ToolExecutionFailed(e.to_string()))?;

        tracing::debug!(query = %query, results = sources.len(), "Web search completed");
        Ok(ToolOutput::WebSearch { sources })
    }
}
