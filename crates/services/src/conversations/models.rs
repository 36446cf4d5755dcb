use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversations::errors::ConversationError;
use crate::id_prefixes::PREFIX_CONV;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl std::str::FromStr for ConversationId {
    type Err = ConversationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.strip_prefix(PREFIX_CONV).unwrap_or(value);
        Uuid::parse_str(value).map(ConversationId).map_err(|e| {
            ConversationError::InvalidParams(format!(
                "Invalid conversation ID: {value}, error: {e}"
            ))
        })
    }
}

impl From<Uuid> for ConversationId {
    fn from(uuid: Uuid) -> Self {
        ConversationId(uuid)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{PREFIX_CONV}{}", self.0.simple())
    }
}

/// Conversation metadata record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: i64,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_conversation_id_round_trip() {
        let id = ConversationId::from(Uuid::new_v4());
        let formatted = id.to_string();
        assert!(formatted.starts_with(PREFIX_CONV));

        let parsed = ConversationId::from_str(&formatted).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_conversation_id_rejects_garbage() {
        assert!(ConversationId::from_str("conv_not-a-uuid").is_err());
    }
}
