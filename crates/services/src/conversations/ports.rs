use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::conversations::errors::ConversationError;
use crate::conversations::models::{Conversation, ConversationId};
use crate::responses::models::{Order, ResponseInputItem};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConversationServiceTrait: Send + Sync {
    async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, ConversationError>;

    async fn list_items(
        &self,
        conversation_id: &ConversationId,
        order: Order,
    ) -> Result<Vec<ResponseInputItem>, ConversationError>;

    async fn add_items(
        &self,
        conversation_id: &ConversationId,
        items: Vec<ResponseInputItem>,
    ) -> Result<(), ConversationError>;
}
