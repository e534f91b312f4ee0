//! Chat title generation.
//!
//! A short system-prompted summarization of the first user message, run
//! concurrently with the main generation. Failures are logged and the chat
//! keeps its placeholder title.

use std::sync::Arc;

use crate::config::{resolve_model_id, GENERATION_TEMPERATURE};
use crate::ports::{GenerationRequest, ModelError, ModelProvider, PromptMessage};

const TITLE_SYSTEM_PROMPT: &str = "You will generate a short title based on \
the first message a user begins a conversation with. Ensure it is not more \
than 80 characters long. The title should be a summary of the user's \
message. Do not use quotes or colons.";

/// Strips quotes and colons and trims the title to `max_chars` characters.
///
/// The model is asked not to produce them, but the budget is enforced here
/// regardless of what comes back.
pub fn sanitize_title(raw: &str, max_chars: usize) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\u{2018}' | '\u{2019}' | '\u{201c}' | '\u{201d}' | ':'))
        .collect();
    cleaned.trim().chars().take(max_chars).collect()
}

/// Generates a title for a chat from its first user message.
pub async fn generate_title(
    provider: Arc<dyn ModelProvider>,
    first_message: &str,
    max_chars: usize,
) -> Result<String, ModelError> {
    let request = GenerationRequest {
        model: resolve_model_id(None).to_string(),
        messages: vec![
            PromptMessage::system(TITLE_SYSTEM_PROMPT),
            PromptMessage::user(first_message),
        ],
        temperature: GENERATION_TEMPERATURE,
        max_tokens: Some(64),
    };

    let raw = provider.complete(request).await?;
    Ok(sanitize_title(&raw, max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_quotes_and_colons() {
        assert_eq!(
            sanitize_title(r#""Rust: a love story""#, 80),
            "Rust a love story"
        );
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(sanitize_title("  Greetings  ", 80), "Greetings");
    }

    #[test]
    fn truncates_to_budget() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_title(&long, 80).chars().count(), 80);
    }

    proptest! {
        #[test]
        fn sanitized_titles_never_exceed_budget_or_contain_banned_chars(raw in ".*") {
            let title = sanitize_title(&raw, 80);
            prop_assert!(title.chars().count() <= 80);
            prop_assert!(!title.contains('"'));
            prop_assert!(!title.contains(':'));
        }
    }
}
