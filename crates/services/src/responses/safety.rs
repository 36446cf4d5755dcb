//! Safety gating for response generation.
//!
//! One gate covers both ends of the loop: named checks run over the message
//! buffer before inference, and the moderation model runs over finalized
//! output text before termination. Unknown check identifiers are a hard
//! validation failure, raised before any inference call.

use std::sync::Arc;

use futures::future;
use inference_providers::ChatMessage;

use crate::responses::errors::ResponseError;
use crate::responses::ports::{SafetyProviderTrait, SafetyViolation};

pub struct SafetyGate {
    provider: Option<Arc<dyn SafetyProviderTrait>>,
    check_ids: Vec<String>,
}

impl SafetyGate {
    pub fn new(provider: Option<Arc<dyn SafetyProviderTrait>>, check_ids: Vec<String>) -> Self {
        Self {
            provider,
            check_ids,
        }
    }

    /// Whether any check would run
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some() && !self.check_ids.is_empty()
    }

    /// Reject check ids the backend does not know. Must run before the
    /// first inference call.
    pub async fn validate_check_ids(&self) -> Result<(), ResponseError> {
        let Some(provider) = &self.provider else {
            if self.check_ids.is_empty() {
                return Ok(());
            }
            return Err(ResponseError::InvalidParams(
                "Safety checks requested but no safety backend is configured".to_string(),
            ));
        };

        if self.check_ids.is_empty() {
            return Ok(());
        }

        let known = provider.list_checks().await;
        for check_id in &self.check_ids {
            if !known.contains(check_id) {
                return Err(ResponseError::InvalidParams(format!(
                    "Unknown safety check: {check_id}"
                )));
            }
        }
        Ok(())
    }

    /// Run all configured checks over a message list. Checks are evaluated
    /// independently and concurrently; the first violation in check-id
    /// order supplies the refusal text. Empty check ids or empty input
    /// never contacts the backend.
    pub async fn check_messages(
        &self,
        messages: &[ChatMessage],
    ) -> Result<Option<SafetyViolation>, ResponseError> {
        if messages.is_empty() || self.check_ids.is_empty() {
            return Ok(None);
        }
        let Some(provider) = &self.provider else {
            return Ok(None);
        };

        let checks = self
            .check_ids
            .iter()
            .map(|check_id| provider.run_check(check_id, messages));
        let results = future::join_all(checks).await;

        for (check_id, result) in self.check_ids.iter().zip(results) {
            match result {
                Ok(Some(violation)) => {
                    tracing::info!(check_id = %check_id, "Safety check flagged input");
                    return Ok(Some(violation));
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(ResponseError::InternalError(format!(
                        "Safety check '{check_id}' failed: {e}"
                    )));
                }
            }
        }
        Ok(None)
    }

    /// Run moderation over finalized output text. Empty text or a disabled
    /// gate never contacts the backend.
    pub async fn check_text(&self, text: &str) -> Result<Option<SafetyViolation>, ResponseError> {
        if text.is_empty() || self.check_ids.is_empty() {
            return Ok(None);
        }
        let Some(provider) = &self.provider else {
            return Ok(None);
        };

        let moderation = provider
            .run_moderation(text)
            .await
            .map_err(|e| ResponseError::InternalError(format!("Moderation failed: {e}")))?;

        if moderation.flagged {
            tracing::info!(
                categories = ?moderation.categories,
                "Moderation flagged output text"
            );
            return Ok(Some(SafetyViolation {
                check_id: "moderation".to_string(),
                message: format!(
                    "Content flagged for: {}",
                    moderation.categories.join(", ")
                ),
            }));
        }
        Ok(None)
    }
}
