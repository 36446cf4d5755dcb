//! Executor for the built-in file_search tool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::responses::errors::ResponseError;
use crate::responses::tools::ports::FileSearchProviderTrait;

use super::executor::{ToolCallInfo, ToolExecutor, ToolOutput};

pub const FILE_SEARCH_TOOL_NAME: &str = "file_search";

pub struct FileSearchToolExecutor {
    provider: Arc<dyn FileSearchProviderTrait>,
    vector_store_ids: Vec<String>,
    max_num_results: Option<usize>,
}

impl FileSearchToolExecutor {
    pub fn new(
        provider: Arc<dyn FileSearchProviderTrait>,
        vector_store_ids: Vec<String>,
        max_num_results: Option<usize>,
    ) -> Self {
        Self {
            provider,
            vector_store_ids,
            max_num_results,
        }
    }
}

#[async_trait]
impl ToolExecutor for FileSearchToolExecutor {
    fn name(&self) -> &str {
        FILE_SEARCH_TOOL_NAME
    }

    fn can_handle(&self, tool_name: &str) -> bool {
        tool_name == FILE_SEARCH_TOOL_NAME
    }

    async fn execute(&self, tool_call: &ToolCallInfo) -> Result<ToolOutput, ResponseError> {
        let query = tool_call.query().ok_or_else(|| {
            ResponseError::InvalidParams("file_search requires a 'query' argument".to_string())
        })?;

        let results = self
            .provider
            .search(&self.vector_store_ids, query, self.max_num_results)
            .await
            .map_err(|e| ResponseError::ToolExecutionFailed(e.to_string()))?;

        tracing::debug!(query = %query, results = results.len(), "File search completed");
        Ok(ToolOutput::FileSearch { results })
    }
}
