use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::responses::models::FileSearchResult;

/// Result from a web search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WebSearchError {
    #[error("Web search failed: {0}")]
    RequestFailed(String),
}

/// Web search provider trait
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WebSearchProviderTrait: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<WebSearchResult>, WebSearchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FileSearchError {
    #[error("File search failed: {0}")]
    SearchFailed(String),
}

/// File search provider trait
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FileSearchProviderTrait: Send + Sync {
    async fn search(
        &self,
        vector_store_ids: &[String],
        query: &str,
        max_num_results: Option<usize>,
    ) -> Result<Vec<FileSearchResult>, FileSearchError>;
}
