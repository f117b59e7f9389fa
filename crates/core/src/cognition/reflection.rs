//! Bounded self-reflection over a draft (plan or command).

use crate::cognition::routing;
use crate::cognition::safety::{SafetyChecker, SafetyReport};
use crate::config::GaiaCfg;
use crate::memory::summarizer;
use crate::types::Persona;
use gaia_llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Rough size estimate used for the draft budget.
const CHARS_PER_TOKEN: usize = 4;

const NEGATIVE_KEYWORDS: &[&str] = &["unsafe", "hallucination", "privacy leak"];
const POSITIVE_KEYWORDS: &[&str] = &["safe", "no issues", "passed"];
const REJECT_KEYWORDS: &[&str] = &["rejected", "unsafe", "do not run", "block"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ThresholdReached,
    IterationsExhausted,
    LlmError,
}

#[derive(Debug, Clone)]
pub struct Refinement {
    /// Final text: the part after `PLAN:` if present, else the whole candidate.
    pub text: String,
    pub iterations: usize,
    pub confidence: f32,
    pub stop: StopReason,
    pub safety: SafetyReport,
}

impl Refinement {
    /// A refined command is rejected when reflection flagged it or it failed the safety check.
    pub fn rejected(&self) -> bool {
        if !self.safety.safe {
            return true;
        }
        let lower = self.text.to_lowercase();
        REJECT_KEYWORDS.iter().any(|k| lower.contains(k))
    }
}

/// Confidence in `[0, 1]`: an explicit `Confidence: x` line wins, then keywords, else 0.
pub fn extract_confidence(text: &str) -> f32 {
    for line in text.lines() {
        let line = line.trim();
        let Some(head) = line.get(..11) else { continue };
        if !head.eq_ignore_ascii_case("confidence:") {
            continue;
        }
        let value = line[11..].split_whitespace().next().unwrap_or_default();
        if let Ok(v) = value.trim_end_matches(['.', ',']).parse::<f32>()
            && v.is_finite()
        {
            return v.clamp(0.0, 1.0);
        }
    }
    let lower = text.to_lowercase();
    if NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        0.0
    } else if POSITIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        1.0
    } else {
        0.0
    }
}

fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Runs the reflection loop with one judging model and one safety checker.
pub struct Reflector<'a> {
    llm: &'a dyn LlmProvider,
    safety: &'a dyn SafetyChecker,
    cfg: &'a GaiaCfg,
}

impl<'a> Reflector<'a> {
    pub fn new(llm: &'a dyn LlmProvider, safety: &'a dyn SafetyChecker, cfg: &'a GaiaCfg) -> Self {
        Self { llm, safety, cfg }
    }

    pub async fn reflect_and_refine(
        &self,
        user_input: &str,
        draft: &str,
        persona: &Persona,
        instructions: &[String],
    ) -> Refinement {
        let subject = self.fit_to_budget(draft).await;
        let base = self.build_prompt(user_input, &subject, persona, instructions);

        let mut candidate = subject.clone();
        let mut confidence = 0.0;
        let mut iterations = 0;
        let mut stop = StopReason::IterationsExhausted;

        while iterations < self.cfg.max_reflection_iterations {
            iterations += 1;
            let mut messages = base.clone();
            if iterations > 1 {
                messages.push(ChatMessage::assistant(candidate.clone()));
                messages.push(ChatMessage::user(format!(
                    "Your confidence was {confidence:.2}. Improve the text and state your new confidence."
                )));
            }
            let request = CompletionRequest::new(messages, self.cfg.reflection_max_tokens, self.cfg.reflection_temperature);

            match self.llm.complete(request).await {
                Ok(resp) => {
                    let text = resp.content.trim();
                    confidence = extract_confidence(text);
                    if !text.is_empty() {
                        candidate = text.to_string();
                    }
                    tracing::debug!(iteration = iterations, confidence, "reflection iteration");
                    if confidence >= self.cfg.reflection_threshold {
                        stop = StopReason::ThresholdReached;
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(model = self.llm.name(), iteration = iterations, error = %e, "reflection call failed");
                    stop = StopReason::LlmError;
                    break;
                }
            }
        }

        let safety = self.safety.check(&candidate, &persona.traits, instructions);
        if safety.safe {
            tracing::info!(iterations, confidence, ?stop, "reflection passed safety check");
        } else {
            tracing::warn!(iterations, confidence, ?stop, reason = ?safety.reason, "reflection failed safety check");
        }

        let text = routing::after_plan_marker(&candidate).map(str::to_string).unwrap_or(candidate);
        Refinement { text, iterations, confidence, stop, safety }
    }

    /// Summarize drafts over the token budget; on failure keep the tail that fits.
    async fn fit_to_budget(&self, draft: &str) -> String {
        let budget = self.cfg.reflection_token_budget;
        if estimate_tokens(draft) <= budget {
            return draft.to_string();
        }
        match summarizer::summarize_text(self.llm, draft, self.cfg.reflection_max_tokens).await {
            Ok(summary) => {
                tracing::debug!(draft_tokens = estimate_tokens(draft), budget, "draft summarized before reflection");
                summary
            }
            Err(e) => {
                tracing::warn!(error = %e, "draft summarization failed, truncating");
                summarizer::tail_window(draft, budget * CHARS_PER_TOKEN).to_string()
            }
        }
    }

    fn build_prompt(&self, user_input: &str, subject: &str, persona: &Persona, instructions: &[String]) -> Vec<ChatMessage> {
        let mut system = format!(
            "You are {}'s internal reflection engine. Review the draft for errors, hallucinations, \
             privacy leaks or unsafe content, and improve it.\n",
            persona.name
        );
        if !instructions.is_empty() {
            system.push_str("Guidelines: ");
            system.push_str(&instructions.join("; "));
            system.push('\n');
        }
        system.push_str(
            "Reply with the improved draft after a line starting with PLAN:, then a final line \
             `Confidence: <0-1>`. If the draft must not be carried out, start your reply with REJECTED.",
        );
        let user = format!("User request:\n{user_input}\n\nDraft:\n{subject}");
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::safety::KeywordSafetyChecker;
    use gaia_llm::provider::MockProvider;

    fn run<'a>(llm: &'a MockProvider, safety: &'a KeywordSafetyChecker, cfg: &'a GaiaCfg) -> Reflector<'a> {
        Reflector::new(llm, safety, cfg)
    }

    #[test]
    fn explicit_confidence_is_clamped() {
        assert_eq!(extract_confidence("Confidence: 0.95\nLooks good"), 0.95);
        assert_eq!(extract_confidence("confidence: 7"), 1.0);
        assert_eq!(extract_confidence("CONFIDENCE: -2"), 0.0);
        assert_eq!(extract_confidence("Confidence: 0.5."), 0.5);
    }

    #[test]
    fn keyword_fallback() {
        assert_eq!(extract_confidence("The output is safe."), 1.0);
        assert_eq!(extract_confidence("No issues found"), 1.0);
        assert_eq!(extract_confidence("This is unsafe"), 0.0);
        assert_eq!(extract_confidence("Contains hallucinations"), 0.0);
        assert_eq!(extract_confidence("Confidence: high, passed"), 1.0);
        assert_eq!(extract_confidence("hmm"), 0.0);
        assert_eq!(extract_confidence(""), 0.0);
        // a negative keyword outweighs any positive one
        assert_eq!(extract_confidence("No issues, no hallucinations or privacy leaks; safe."), 0.0);
    }

    #[test]
    fn confidence_always_in_unit_range() {
        for text in ["Confidence: NaN", "Confidence: inf", "Confidence: 1e9", "Confidence: 0.3", "x"] {
            let c = extract_confidence(text);
            assert!((0.0..=1.0).contains(&c), "{text} -> {c}");
        }
    }

    #[tokio::test]
    async fn stops_at_threshold() {
        let cfg = GaiaCfg::default();
        let safety = KeywordSafetyChecker::default();
        let llm = MockProvider::scripted(["Confidence: 0.95\nLooks good", "never used"]);
        let r = run(&llm, &safety, &cfg).reflect_and_refine("hi", "draft plan", &Persona::default(), &[]).await;
        assert_eq!(r.iterations, 1);
        assert_eq!(r.stop, StopReason::ThresholdReached);
        assert_eq!(r.text, "Confidence: 0.95\nLooks good");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_replies_terminate_within_bound() {
        let cfg = GaiaCfg::default();
        let safety = KeywordSafetyChecker::default();
        let llm = MockProvider::new("");
        let r = run(&llm, &safety, &cfg).reflect_and_refine("hi", "original", &Persona::default(), &[]).await;
        assert_eq!(r.iterations, cfg.max_reflection_iterations);
        assert_eq!(llm.call_count(), cfg.max_reflection_iterations);
        assert_eq!(r.stop, StopReason::IterationsExhausted);
        assert_eq!(r.text, "original");
        assert_eq!(r.confidence, 0.0);
    }

    #[tokio::test]
    async fn llm_error_breaks_loop() {
        let cfg = GaiaCfg::default();
        let safety = KeywordSafetyChecker::default();
        let llm = MockProvider::failing("offline");
        let r = run(&llm, &safety, &cfg).reflect_and_refine("hi", "keep me", &Persona::default(), &[]).await;
        assert_eq!(r.stop, StopReason::LlmError);
        assert_eq!(r.iterations, 1);
        assert_eq!(r.text, "keep me");
    }

    #[tokio::test]
    async fn plan_marker_is_extracted() {
        let cfg = GaiaCfg::default();
        let safety = KeywordSafetyChecker::default();
        let llm = MockProvider::new("Reviewed.\nPLAN: open the file\nConfidence: 1");
        let r = run(&llm, &safety, &cfg).reflect_and_refine("hi", "d", &Persona::default(), &[]).await;
        assert_eq!(r.text, "open the file\nConfidence: 1");
    }

    #[tokio::test]
    async fn later_iterations_see_previous_candidate() {
        let cfg = GaiaCfg::default();
        let safety = KeywordSafetyChecker::default();
        let llm = MockProvider::scripted(["attempt one\nConfidence: 0.2", "attempt two\nConfidence: 0.92"]);
        let r = run(&llm, &safety, &cfg).reflect_and_refine("hi", "d", &Persona::default(), &[]).await;
        assert_eq!(r.iterations, 2);
        let second = &llm.requests()[1].messages;
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].content, "attempt one\nConfidence: 0.2");
    }

    #[tokio::test]
    async fn oversized_draft_is_summarized_first() {
        let cfg = GaiaCfg { reflection_token_budget: 4, ..GaiaCfg::default() };
        let safety = KeywordSafetyChecker::default();
        let llm = MockProvider::scripted(["short summary", "Confidence: 1"]);
        let draft = "a long draft that is clearly over sixteen characters";
        run(&llm, &safety, &cfg).reflect_and_refine("hi", draft, &Persona::default(), &[]).await;
        let reqs = llm.requests();
        assert_eq!(reqs.len(), 2);
        assert!(reqs[1].messages[1].content.contains("short summary"));
        assert!(!reqs[1].messages[1].content.contains(draft));
    }

    #[tokio::test]
    async fn unsafe_candidate_is_flagged_but_returned() {
        let cfg = GaiaCfg::default();
        let safety = KeywordSafetyChecker::default();
        let llm = MockProvider::new("run rm -rf / now. Confidence: 0.1");
        let r = run(&llm, &safety, &cfg).reflect_and_refine("hi", "d", &Persona::default(), &[]).await;
        assert!(!r.safety.safe);
        assert!(r.rejected());
        assert!(r.text.contains("rm -rf"));
    }

    #[tokio::test]
    async fn empty_draft_does_not_crash() {
        let cfg = GaiaCfg { reflection_token_budget: 0, ..GaiaCfg::default() };
        let safety = KeywordSafetyChecker::default();
        let llm = MockProvider::new("Confidence: 1");
        let r = run(&llm, &safety, &cfg).reflect_and_refine("hi", "", &Persona::default(), &[]).await;
        assert_eq!(r.stop, StopReason::ThresholdReached);
    }

    #[test]
    fn rejection_keywords() {
        let mk = |text: &str| Refinement {
            text: text.into(),
            iterations: 1,
            confidence: 1.0,
            stop: StopReason::ThresholdReached,
            safety: SafetyReport::pass(),
        };
        assert!(mk("REJECTED: writes outside workspace").rejected());
        assert!(!mk("ai.read(\"notes.txt\")").rejected());
    }
}
