//! Mapping of internal backend error messages to stable, user-safe codes.
//!
//! Raw backend exception text must never reach a client. Recognized patterns
//! map to fixed messages; everything else falls back to a generic code.

use std::sync::LazyLock;

use regex::Regex;

pub struct RuntimeErrorRule {
    pub code: &'static str,
    pub default_message: &'static str,
    pub substrings: &'static [&'static str],
    pub regex: Option<Regex>,
    /// Capture-expansion template, e.g. "Requested model '$model' is unavailable."
    pub template: Option<&'static str>,
}

impl RuntimeErrorRule {
    /// Returns the sanitized message if the rule matches, otherwise None.
    pub fn evaluate(&self, error_msg: &str) -> Option<String> {
        if let Some(regex) = &self.regex {
            if let Some(captures) = regex.captures(error_msg) {
                if let Some(template) = self.template {
                    let mut message = String::new();
                    captures.expand(template, &mut message);
                    return Some(message);
                }
                return Some(self.default_message.to_string());
            }
        }

        let lowered = error_msg.to_lowercase();
        if !self.substrings.is_empty()
            && self.substrings.iter().all(|pattern| lowered.contains(pattern))
        {
            return Some(self.default_message.to_string());
        }

        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedRuntimeError {
    pub code: String,
    pub message: String,
}

pub const GENERIC_ERROR_CODE: &str = "internal_error";
pub const GENERIC_ERROR_MESSAGE: &str =
    "An internal error occurred while generating the response.";

static RUNTIME_ERROR_RULES: LazyLock<Vec<RuntimeErrorRule>> = LazyLock::new(|| {
    vec![
        RuntimeErrorRule {
            code: "MODEL_NOT_FOUND",
            default_message: "Requested model is unavailable.",
            substrings: &[],
            regex: Some(
                Regex::new(r#"(?i)model ['"]?(?P<model>[^'" ]+)['"]? not found"#)
                    .expect("static regex"),
            ),
            template: Some("Requested model '$model' is unavailable."),
        },
        RuntimeErrorRule {
            code: "CONTEXT_LENGTH_EXCEEDED",
            default_message: "The request exceeds the model's context window.",
            substrings: &["context", "length"],
            regex: None,
            template: None,
        },
    ]
});

/// Map an internal error message to a stable, user-safe code and message.
/// Returns None when no rule matches; callers fall back to the generic code.
pub fn sanitize_runtime_error(message: &str) -> Option<SanitizedRuntimeError> {
    for rule in RUNTIME_ERROR_RULES.iter() {
        if let Some(sanitized_message) = rule.evaluate(message) {
            return Some(SanitizedRuntimeError {
                code: rule.code.to_string(),
                message: sanitized_message,
            });
        }
    }
    None
}

/// Like [`sanitize_runtime_error`], but always produces a user-safe result.
pub fn sanitize_or_generic(message: &str) -> SanitizedRuntimeError {
    sanitize_runtime_error(message).unwrap_or_else(|| {
        tracing::debug!("No sanitizer rule matched; using generic error code");
        SanitizedRuntimeError {
            code: GENERIC_ERROR_CODE.to_string(),
            message: GENERIC_ERROR_MESSAGE.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_found_with_template() {
        let sanitized =
            sanitize_runtime_error("ValueError: model 'llama-99b' not found in registry").unwrap();
        assert_eq!(sanitized.code, "MODEL_NOT_FOUND");
        assert_eq!(sanitized.message, "Requested model 'llama-99b' is unavailable.");
    }

    #[test]
    fn test_model_not_found_double_quotes() {
        let sanitized = sanitize_runtime_error(r#"model "gpt-x" not found"#).unwrap();
        assert_eq!(sanitized.message, "Requested model 'gpt-x' is unavailable.");
    }

    #[test]
    fn test_substring_rule_is_case_insensitive() {
        let sanitized =
            sanitize_runtime_error("Context Length of 8192 exceeded by prompt").unwrap();
        assert_eq!(sanitized.code, "CONTEXT_LENGTH_EXCEEDED");
    }

    #[test]
    fn test_unmatched_error_returns_none() {
        assert!(sanitize_runtime_error("something totally unexpected").is_none());
    }

    #[test]
    fn test_generic_fallback() {
        let sanitized = sanitize_or_generic("segfault in backend");
        assert_eq!(sanitized.code, GENERIC_ERROR_CODE);
        assert_eq!(sanitized.message, GENERIC_ERROR_MESSAGE);
    }
}
