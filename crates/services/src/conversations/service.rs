//! In-memory conversation service.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::conversations::errors::ConversationError;
use crate::conversations::models::{Conversation, ConversationId};
use crate::conversations::ports::ConversationServiceTrait;
use crate::responses::models::{Order, ResponseInputItem};

#[derive(Default)]
pub struct InMemoryConversationService {
    conversations: RwLock<HashMap<ConversationId, (Conversation, Vec<ResponseInputItem>)>>,
}

impl InMemoryConversationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation and return its id
    pub fn create_conversation(&self, metadata: serde_json::Value) -> ConversationId {
        let id = ConversationId::from(Uuid::new_v4());
        let conversation = Conversation {
            id,
            created_at: chrono::Utc::now().timestamp(),
            metadata,
        };
        self.conversations
            .write()
            .unwrap()
            .insert(id, (conversation, vec![]));
        id
    }
}

#[async_trait]
impl ConversationServiceTrait for InMemoryConversationService {
    async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, ConversationError> {
        let conversations = self.conversations.read().unwrap();
        Ok(conversations.get(conversation_id).map(|(c, _)| c.clone()))
    }

    async fn list_items(
        &self,
        conversation_id: &ConversationId,
        order: Order,
    ) -> Result<Vec<ResponseInputItem>, ConversationError> {
        let conversations = self.conversations.read().unwrap();
        let (_, items) = conversations
            .get(conversation_id)
            .ok_or_else(|| ConversationError::NotFound(conversation_id.to_string()))?;

        let mut items = items.clone();
        if order == Order::Desc {
            items.reverse();
        }
        Ok(items)
    }

    async fn add_items(
        &self,
        conversation_id: &ConversationId,
        mut new_items: Vec<ResponseInputItem>,
    ) -> Result<(), ConversationError> {
        let mut conversations = self.conversations.write().unwrap();
        let (_, items) = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| ConversationError::NotFound(conversation_id.to_string()))?;
        items.append(&mut new_items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::models::{MessageContent, ResponseOutputItem};

    fn user_message(text: &str) -> ResponseInputItem {
        ResponseInputItem::Item(ResponseOutputItem::Message {
            id: format!("msg_{text}"),
            role: "user".to_string(),
            content: MessageContent::Text(text.to_string()),
            status: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_add_and_list_items_preserves_order() {
        let service = InMemoryConversationService::new();
        let id = service.create_conversation(serde_json::json!({}));

        service
            .add_items(&id, vec![user_message("first"), user_message("second")])
            .await
            .unwrap();

        let items = service.list_items(&id, Order::Asc).await.unwrap();
        assert_eq!(items.len(), 2);
        match &items[0] {
            ResponseInputItem::Item(ResponseOutputItem::Message { content, .. }) => {
                assert_eq!(content.text(), "first");
            }
            other => panic!("Expected message, got: {other:?}"),
        }

        let items = service.list_items(&id, Order::Desc).await.unwrap();
        match &items[0] {
            ResponseInputItem::Item(ResponseOutputItem::Message { content, .. }) => {
                assert_eq!(content.text(), "second");
            }
            other => panic!("Expected message, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_conversation_not_found() {
        let service = InMemoryConversationService::new();
        let id = ConversationId::from(Uuid::new_v4());
        assert!(service.get_conversation(&id).await.unwrap().is_none());
        assert!(matches!(
            service.list_items(&id, Order::Asc).await,
            Err(ConversationError::NotFound(_))
        ));
    }
}
