//! In-memory response repository.
//!
//! Reference implementation of [`ResponseRepositoryTrait`] backing tests and
//! embedding callers; production deployments supply a database-backed one.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::responses::models::{ListResponsesPage, Order};
use crate::responses::ports::{ResponseRepositoryTrait, StoredResponse};

#[derive(Default)]
pub struct InMemoryResponseRepository {
    // Insertion-ordered; ids are unique so a Vec keeps listing simple
    entries: RwLock<Vec<StoredResponse>>,
}

impl InMemoryResponseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseRepositoryTrait for InMemoryResponseRepository {
    async fn put(&self, stored: StoredResponse) -> anyhow::Result<()> {
        let mut entries = self.entries.write().unwrap();
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.response.id == stored.response.id)
        {
            *existing = stored;
        } else {
            entries.push(stored);
        }
        Ok(())
    }

    async fn get(&self, response_id: &str) -> anyhow::Result<Option<StoredResponse>> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .iter()
            .find(|e| e.response.id == response_id)
            .cloned())
    }

    async fn list(
        &self,
        after: Option<String>,
        limit: usize,
        model: Option<String>,
        order: Order,
    ) -> anyhow::Result<ListResponsesPage> {
        let entries = self.entries.read().unwrap();

        let mut responses: Vec<_> = entries
            .iter()
            .map(|e| e.response.clone())
            .filter(|r| model.as_deref().is_none_or(|m| r.model == m))
            .collect();
        if order == Order::Desc {
            responses.reverse();
        }

        let start = match &after {
            Some(after_id) => responses
                .iter()
                .position(|r| &r.id == after_id)
                .map(|pos| pos + 1)
                .unwrap_or(0),
            None => 0,
        };
        let remaining = &responses[start.min(responses.len())..];
        let has_more = remaining.len() > limit;
        let page: Vec<_> = remaining.iter().take(limit).cloned().collect();

        Ok(ListResponsesPage {
            object: "list".to_string(),
            first_id: page.first().map(|r| r.id.clone()),
            last_id: page.last().map(|r| r.id.clone()),
            has_more,
            data: page,
        })
    }

    async fn delete(&self, response_id: &str) -> anyhow::Result<bool> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|e| e.response.id != response_id);
        Ok(entries.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::models::{
        ResponseObject, ResponseStatus, ResponseTextConfig, Usage,
    };

    fn stored(id: &str, model: &str) -> StoredResponse {
        StoredResponse {
            response: ResponseObject {
                id: id.to_string(),
                object: "response".to_string(),
                created_at: 1234567890,
                model: model.to_string(),
                status: ResponseStatus::Completed,
                error: None,
                incomplete_details: None,
                instructions: None,
                output: vec![],
                previous_response_id: None,
                temperature: None,
                top_p: None,
                text: ResponseTextConfig::default(),
                tool_choice: None,
                tools: vec![],
                usage: Usage::default(),
                metadata: None,
            },
            input: vec![],
            messages: vec![],
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let repo = InMemoryResponseRepository::new();
        repo.put(stored("resp_1", "m")).await.unwrap();

        let loaded = repo.get("resp_1").await.unwrap().unwrap();
        assert_eq!(loaded.response.id, "resp_1");
        assert_eq!(loaded.response.status, ResponseStatus::Completed);

        assert!(repo.get("resp_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_same_id() {
        let repo = InMemoryResponseRepository::new();
        repo.put(stored("resp_1", "m1")).await.unwrap();
        repo.put(stored("resp_1", "m2")).await.unwrap();

        assert_eq!(repo.len(), 1);
        let loaded = repo.get("resp_1").await.unwrap().unwrap();
        assert_eq!(loaded.response.model, "m2");
    }

    #[tokio::test]
    async fn test_list_order_and_paging() {
        let repo = InMemoryResponseRepository::new();
        for i in 1..=5 {
            repo.put(stored(&format!("resp_{i}"), "m")).await.unwrap();
        }

        let page = repo.list(None, 2, None, Order::Asc).await.unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.first_id.as_deref(), Some("resp_1"));
        assert!(page.has_more);

        let page = repo
            .list(Some("resp_2".to_string()), 10, None, Order::Asc)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.first_id.as_deref(), Some("resp_3"));
        assert!(!page.has_more);

        let page = repo.list(None, 10, None, Order::Desc).await.unwrap();
        assert_eq!(page.first_id.as_deref(), Some("resp_5"));
    }

    #[tokio::test]
    async fn test_list_filters_by_model() {
        let repo = InMemoryResponseRepository::new();
        repo.put(stored("resp_1", "alpha")).await.unwrap();
        repo.put(stored("resp_2", "beta")).await.unwrap();

        let page = repo
            .list(None, 10, Some("beta".to_string()), Order::Asc)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].id, "resp_2");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let repo = InMemoryResponseRepository::new();
        repo.put(stored("resp_1", "m")).await.unwrap();

        assert!(repo.delete("resp_1").await.unwrap());
        assert!(!repo.delete("resp_1").await.unwrap());
        assert!(repo.get("resp_1").await.unwrap().is_none());
    }
}
