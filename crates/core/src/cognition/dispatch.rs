//! Lite-model classification of a turn's complexity and context need.

use crate::types::{Complexity, ContextNeed};
use gaia_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider};
use serde::Deserialize;

const CLASSIFY_INSTRUCTION: &str = "Classify the user's request. Reply with JSON only: \
     {\"complexity\": \"simple\" | \"moderate\" | \"complex\", \
     \"required_context\": \"minimal\" | \"medium\" | \"full\"}";

const CLASSIFY_MAX_TOKENS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub complexity: Complexity,
    pub context: ContextNeed,
}

impl Classification {
    pub fn token_budget(&self) -> u32 {
        self.context.token_budget()
    }

    /// Anything but `Simple` asks for the larger model.
    pub fn wants_prime(&self) -> bool {
        self.complexity != Complexity::Simple
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self { complexity: Complexity::Simple, context: ContextNeed::Minimal }
    }
}

#[derive(Deserialize)]
struct RawClassification {
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    required_context: Option<String>,
}

/// Parse the classifier reply. Any malformed part falls back to its default.
pub fn parse_classification(reply: &str) -> Classification {
    let json = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            tracing::debug!("classifier reply has no JSON object");
            return Classification::default();
        }
    };
    let raw: RawClassification = match serde_json::from_str(json) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "classifier JSON unparsable");
            return Classification::default();
        }
    };

    let complexity = match raw.complexity.as_deref().map(str::to_lowercase).as_deref() {
        Some("moderate" | "medium") => Complexity::Moderate,
        Some("complex" | "high") => Complexity::Complex,
        _ => Complexity::Simple,
    };
    let context = match raw.required_context.as_deref().map(str::to_lowercase).as_deref() {
        Some("medium") => ContextNeed::Medium,
        Some("full" | "high") => ContextNeed::Full,
        _ => ContextNeed::Minimal,
    };
    Classification { complexity, context }
}

/// One classifier call on the lite model.
pub async fn classify(lite: &dyn LlmProvider, user_input: &str, instructions: &[String]) -> Result<Classification, LlmError> {
    let mut system = CLASSIFY_INSTRUCTION.to_string();
    if !instructions.is_empty() {
        system.push_str("\nAssistant instructions: ");
        system.push_str(&instructions.join("; "));
    }
    let request = CompletionRequest::new(
        vec![ChatMessage::system(system), ChatMessage::user(user_input)],
        CLASSIFY_MAX_TOKENS,
        0.0,
    );
    let reply = lite.complete(request).await?;
    let c = parse_classification(&reply.content);
    tracing::debug!(model = lite.name(), complexity = ?c.complexity, context = ?c.context, "turn classified");
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaia_llm::provider::MockProvider;

    #[test]
    fn unparsable_reply_defaults_to_simple_minimal() {
        for reply in ["", "not json", "{broken", "} backwards {", "[1,2]"] {
            let c = parse_classification(reply);
            assert_eq!(c.complexity, Complexity::Simple);
            assert_eq!(c.token_budget(), 1024);
        }
    }

    #[test]
    fn json_embedded_in_prose() {
        let c = parse_classification("Sure! {\"complexity\": \"Complex\", \"required_context\": \"full\"} done");
        assert_eq!(c.complexity, Complexity::Complex);
        assert_eq!(c.token_budget(), 4096);
        assert!(c.wants_prime());
    }

    #[test]
    fn partial_json_keeps_known_fields() {
        let c = parse_classification("{\"required_context\": \"medium\"}");
        assert_eq!(c.complexity, Complexity::Simple);
        assert_eq!(c.token_budget(), 2048);
        assert!(!c.wants_prime());
    }

    #[tokio::test]
    async fn classify_calls_lite_once() {
        let lite = MockProvider::new("{\"complexity\":\"moderate\",\"required_context\":\"minimal\"}");
        let c = classify(&lite, "plan my week", &["be brief".into()]).await.unwrap();
        assert_eq!(c.complexity, Complexity::Moderate);
        assert_eq!(lite.call_count(), 1);
        assert!(lite.requests()[0].messages[0].content.contains("be brief"));
    }

    #[tokio::test]
    async fn classify_propagates_llm_error() {
        let lite = MockProvider::failing("down");
        assert!(classify(&lite, "x", &[]).await.is_err());
    }
}
