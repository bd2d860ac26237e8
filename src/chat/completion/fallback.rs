//! Assistant replies used in place of a failed completion.

use serde::{Deserialize, Serialize};

use crate::chat::completion::client::CompletionError;

/// Fixed replies, one per failure family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackReplies {
    /// No credential configured.
    pub missing_credential: String,
    /// Transport failure, non-success status, unreadable body or timeout.
    pub connection_failed: String,
    /// The model returned no text.
    pub empty_response: String,
    /// The reply itself could not be written to the store.
    pub unexpected: String,
}

impl Default for FallbackReplies {
    fn default() -> Self {
        Self {
            missing_credential: "عذراً، لم يتم تكوين مفتاح API بعد. يرجى إضافة مفتاح OpenAI API في إعدادات التطبيق لتفعيل الذكاء الاصطناعي.".to_string(),
            connection_failed: "عذراً، حدث خطأ في الاتصال بخدمة الذكاء الاصطناعي. يرجى التحقق من اتصال الإنترنت والمحاولة مرة أخرى.".to_string(),
            empty_response: "عذراً، لم أتمكن من معالجة طلبك. يرجى المحاولة مرة أخرى.".to_string(),
            unexpected: "عذراً، حدث خطأ غير متوقع. يرجى المحاولة مرة أخرى.".to_string(),
        }
    }
}

impl FallbackReplies {
    /// Reply text for `error`.
    #[must_use]
    pub fn for_error(&self, error: &CompletionError) -> &str {
        match error {
            CompletionError::MissingCredential => &self.missing_credential,
            CompletionError::Transport(_)
            | CompletionError::Status { .. }
            | CompletionError::Decode(_)
            | CompletionError::Timeout(_) => &self.connection_failed,
            CompletionError::EmptyResponse => &self.empty_response,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_each_failure_family_has_its_own_reply() {
        let replies = FallbackReplies::default();
        let connection = replies.for_error(&CompletionError::Status {
            status: 500,
            body: String::new(),
        });
        assert_eq!(connection, replies.connection_failed);
        assert_eq!(
            replies.for_error(&CompletionError::Timeout(Duration::from_secs(1))),
            connection
        );
        assert_eq!(
            replies.for_error(&CompletionError::Transport("refused".to_string())),
            connection
        );
        assert_eq!(
            replies.for_error(&CompletionError::MissingCredential),
            replies.missing_credential
        );
        assert_eq!(
            replies.for_error(&CompletionError::EmptyResponse),
            replies.empty_response
        );
        assert_eq!(
            replies.for_error(&CompletionError::Decode("eof".to_string())),
            connection
        );
        assert_ne!(connection, replies.unexpected);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let replies: FallbackReplies =
            serde_json::from_str(r#"{"connection_failed": "offline"}"#).unwrap();
        assert_eq!(replies.connection_failed, "offline");
        assert_eq!(replies.unexpected, FallbackReplies::default().unexpected);
    }
}
