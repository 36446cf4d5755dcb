#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Conversation not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}
