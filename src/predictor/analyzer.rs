//! Recent-activity analysis for personalized session openers

use crate::llm::{self, ChatMessage, LanguageModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How many trailing user messages feed the analysis
const MAX_ANALYZED_MESSAGES: usize = 20;

/// Character cap on the analyzed transcript
const MAX_ANALYZED_CHARS: usize = 2000;

/// Digest of what the user has recently been working on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDigest {
    pub activity_type: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub current_focus: String,
    pub welcome_message: String,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
}

impl Default for ContextDigest {
    fn default() -> Self {
        Self {
            activity_type: "general".to_string(),
            topics: Vec::new(),
            current_focus: String::new(),
            welcome_message: "How can I help you today?".to_string(),
            suggested_questions: Vec::new(),
        }
    }
}

/// Summarizes recent user messages into an activity digest
pub struct ContextAnalyzer {
    llm: Arc<dyn LanguageModel>,
}

impl ContextAnalyzer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Analyze recent user messages. Any failure yields the neutral default.
    pub async fn analyze(&self, recent_user_messages: &[String]) -> ContextDigest {
        if recent_user_messages.is_empty() {
            return ContextDigest::default();
        }

        let start = recent_user_messages
            .len()
            .saturating_sub(MAX_ANALYZED_MESSAGES);
        let transcript = recent_user_messages[start..].join("\n");
        let transcript = crate::predictor::truncate_chars(&transcript, MAX_ANALYZED_CHARS);

        let prompt = format!(
            "Analyze the user's recent messages and determine what activity they are \
             primarily engaged in, which topics they are working on, and their current \
             focus.\n\nRecent user messages:\n{}\n\n\
             Return a JSON object with this structure:\n\
             {{\n  \"activity_type\": \"studying|coding|working|researching|learning|general\",\n  \
             \"topics\": [\"topic1\", \"topic2\"],\n  \
             \"current_focus\": \"brief description\",\n  \
             \"welcome_message\": \"personalized welcome message\",\n  \
             \"suggested_questions\": [\"question1\", \"question2\"]\n}}\n\n\
             Only return valid JSON, no additional text.",
            transcript
        );

        let system_prompt = "You are an expert at analyzing user context and activity \
                             patterns. Always respond with valid JSON only.";

        match self
            .llm
            .complete(system_prompt, &[ChatMessage::user(prompt)], 0.3, 500)
            .await
            .and_then(|text| llm::parse_json_object(&text))
            .and_then(|value| {
                serde_json::from_value(value).map_err(|e| {
                    llm::LlmError::Provider(format!("Context digest had wrong shape: {}", e))
                })
            }) {
            Ok(digest) => digest,
            Err(e) => {
                tracing::warn!("Context analysis degraded to default: {}", e);
                ContextDigest::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(
            &self,
            _system_prompt: &str,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            Err(LlmError::Unavailable)
        }
    }

    #[tokio::test]
    async fn test_empty_history_yields_default() {
        let analyzer = ContextAnalyzer::new(Arc::new(FailingModel));
        let digest = analyzer.analyze(&[]).await;
        assert_eq!(digest.activity_type, "general");
        assert_eq!(digest.welcome_message, "How can I help you today?");
    }

    #[tokio::test]
    async fn test_model_failure_yields_default() {
        let analyzer = ContextAnalyzer::new(Arc::new(FailingModel));
        let digest = analyzer
            .analyze(&["how do I write a binary search in rust?".to_string()])
            .await;
        assert_eq!(digest.activity_type, "general");
    }
}
