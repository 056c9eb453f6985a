//! Conversation titles from the first user message

use tracing::warn;
use tripwise_common::{ChatMessage, LmGateway};

use crate::context::complete_timed;

pub const DEFAULT_TITLE: &str = "New Chat";

const MAX_TITLE_CHARS: usize = 60;

fn build_prompt(message: &str) -> String {
    format!(
        "Generate a short, descriptive title (max 6 words) for a chat that starts with this message:\n\
         \"{}\"\n\n\
         Return ONLY the title, no quotes, no explanation.\n\
         Examples:\n\
         - \"What are TSA liquid rules?\" → \"TSA Liquid Rules\"\n\
         - \"Do I need a visa to Japan?\" → \"Japan Visa Requirements\"\n\
         - \"Help me pack for Paris\" → \"Paris Packing Guide\"",
        message
    )
}

fn clean_title(raw: &str) -> String {
    let title = raw.trim().trim_matches('"').trim_matches('\'').trim();
    title.chars().take(MAX_TITLE_CHARS).collect()
}

/// Title for a new conversation; falls back to [`DEFAULT_TITLE`]
pub async fn generate_title(llm: &dyn LmGateway, first_message: &str) -> String {
    match complete_timed(llm, "title", &[ChatMessage::user(build_prompt(first_message))]).await {
        Ok(raw) => {
            let title = clean_title(&raw);
            if title.is_empty() {
                DEFAULT_TITLE.to_string()
            } else {
                title
            }
        }
        Err(e) => {
            warn!(error = %e, "Title generation failed");
            DEFAULT_TITLE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLm;

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Japan Visa Requirements\"\n"), "Japan Visa Requirements");
        assert_eq!(clean_title("'TSA Liquid Rules'"), "TSA Liquid Rules");
        assert_eq!(clean_title(&"a".repeat(80)).len(), 60);
    }

    #[test]
    fn test_generate_title() {
        let lm = ScriptedLm::new().title(["\"Paris Packing Guide\""]);
        let title = tokio_test::block_on(generate_title(&lm, "Help me pack for Paris"));
        assert_eq!(title, "Paris Packing Guide");
    }

    #[tokio::test]
    async fn test_failure_and_blank_fall_back() {
        assert_eq!(generate_title(&ScriptedLm::failing(), "hi").await, DEFAULT_TITLE);
        assert_eq!(generate_title(&ScriptedLm::new().title(["\"\""]), "hi").await, DEFAULT_TITLE);
    }
}
