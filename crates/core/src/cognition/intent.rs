//! Intent detection: reflex patterns first, then a constrained model call.

use crate::types::Intent;
use gaia_llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Reflex path. No model involved.
pub fn fast_intent_check(text: &str) -> Option<Intent> {
    let text = text.trim().to_lowercase();
    if matches!(text.as_str(), "exit" | "quit" | "bye") {
        return Some(Intent::Exit);
    }
    if text.starts_with("help") || matches!(text.as_str(), "?" | "h") {
        return Some(Intent::Help);
    }
    if text.starts_with("ls ") || text.starts_with("cat ") || text.starts_with("pwd") || text == "ls" {
        return Some(Intent::Shell);
    }
    None
}

/// First word of the reply if it names a model-selectable intent, else `Other`.
pub fn parse_model_intent(reply: &str) -> Intent {
    let word = reply
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .to_lowercase();
    Intent::parse(&word)
        .filter(|i| Intent::MODEL_CHOICES.contains(i))
        .unwrap_or_default()
}

/// Constrained model call. Errors and anomalies yield `Other`.
pub async fn model_intent(llm: &dyn LlmProvider, text: &str) -> Intent {
    let choices: Vec<&str> = Intent::MODEL_CHOICES.iter().map(|i| i.as_str()).collect();
    let prompt = format!(
        "Given the following user input, return ONLY the primary intent, exactly as one of:\n{}.\nUser Input: {text}\nIntent:",
        choices.join(", ")
    );
    let request = CompletionRequest::new(
        vec![ChatMessage::system("Intent detection agent."), ChatMessage::user(prompt)],
        6,
        0.0,
    );
    match llm.complete(request).await {
        Ok(reply) => {
            let intent = parse_model_intent(&reply.content);
            tracing::info!(model = llm.name(), intent = intent.as_str(), "model intent detected");
            intent
        }
        Err(e) => {
            tracing::warn!(model = llm.name(), error = %e, "intent detection failed");
            Intent::Other
        }
    }
}

/// Reflex check, then the first available model (lite preferred).
pub async fn detect_intent(text: &str, lite: Option<&dyn LlmProvider>, prime: Option<&dyn LlmProvider>) -> Intent {
    if let Some(intent) = fast_intent_check(text) {
        tracing::debug!(intent = intent.as_str(), "reflex intent");
        return intent;
    }
    match lite.or(prime) {
        Some(llm) => model_intent(llm, text).await,
        None => {
            tracing::warn!("no model available for intent detection");
            Intent::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaia_llm::provider::MockProvider;

    #[test]
    fn reflexes() {
        assert_eq!(fast_intent_check("  EXIT "), Some(Intent::Exit));
        assert_eq!(fast_intent_check("bye"), Some(Intent::Exit));
        assert_eq!(fast_intent_check("help me"), Some(Intent::Help));
        assert_eq!(fast_intent_check("?"), Some(Intent::Help));
        assert_eq!(fast_intent_check("ls -la"), Some(Intent::Shell));
        assert_eq!(fast_intent_check("pwd"), Some(Intent::Shell));
        assert_eq!(fast_intent_check("cat notes.txt"), Some(Intent::Shell));
        assert_eq!(fast_intent_check("exit the building"), None);
        assert_eq!(fast_intent_check("what is rust"), None);
    }

    #[test]
    fn model_reply_parsing() {
        assert_eq!(parse_model_intent("read_file"), Intent::ReadFile);
        assert_eq!(parse_model_intent("  Seed. because"), Intent::Seed);
        assert_eq!(parse_model_intent("`shell`"), Intent::Shell);
        assert_eq!(parse_model_intent("exit"), Intent::Other);
        assert_eq!(parse_model_intent("dance"), Intent::Other);
        assert_eq!(parse_model_intent(""), Intent::Other);
    }

    #[tokio::test]
    async fn reflex_makes_no_model_call() {
        let lite = MockProvider::new("shell");
        assert_eq!(detect_intent("help", Some(&lite), None).await, Intent::Help);
        assert_eq!(lite.call_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_prime_then_other() {
        let prime = MockProvider::new("reflect");
        assert_eq!(detect_intent("think about today", None, Some(&prime)).await, Intent::Reflect);
        assert_eq!(detect_intent("think about today", None, None).await, Intent::Other);
        let failing = MockProvider::failing("x");
        assert_eq!(detect_intent("think", Some(&failing), None).await, Intent::Other);
    }
}
