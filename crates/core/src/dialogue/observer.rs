//! Mid-stream judge that may interrupt a response while it is generated.

use crate::config::GaiaCfg;
use crate::memory::summarizer;
use gaia_llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

const DEFAULT_REASON: &str = "Interrupted by observer.";

const JUDGE_INSTRUCTION: &str = "You watch an assistant's reply while it is being written. \
     Reply with exactly CONTINUE if the reply is on track. \
     Reply with INTERRUPT: <reason> if it is unsafe, repeats itself, invents facts or drifts off topic. \
     Do not write anything else.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Interrupt,
}

/// What the judge sees besides the buffer.
#[derive(Debug, Clone, Default)]
pub struct ObserverContext {
    pub user_input: String,
    pub instructions: Vec<String>,
}

/// Judges the accumulated output of one stream. Use one observer per stream.
pub struct StreamObserver<'a> {
    judge: Option<&'a dyn LlmProvider>,
    embedder: Option<&'a dyn LlmProvider>,
    summarize_chars: usize,
    salient_sentences: usize,
    max_tokens: u32,
    interrupt_reason: Option<String>,
}

impl<'a> StreamObserver<'a> {
    /// Without a judge every `observe` returns `Continue`.
    pub fn new(judge: Option<&'a dyn LlmProvider>, cfg: &GaiaCfg) -> Self {
        Self {
            judge,
            embedder: None,
            summarize_chars: cfg.observer_summarize_chars,
            salient_sentences: cfg.observer_salient_sentences,
            max_tokens: cfg.observer_max_tokens,
            interrupt_reason: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Option<&'a dyn LlmProvider>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt_reason.is_some()
    }

    pub fn interrupt_reason(&self) -> Option<&str> {
        self.interrupt_reason.as_deref()
    }

    /// Judge `buffer`. Once interrupted, stays interrupted without further judging.
    pub async fn observe(&mut self, buffer: &str, ctx: &ObserverContext) -> Verdict {
        if self.interrupted() {
            return Verdict::Interrupt;
        }
        let Some(judge) = self.judge else {
            return Verdict::Continue;
        };

        let excerpt = if buffer.chars().count() > self.summarize_chars {
            summarizer::salient_sentences(buffer, self.embedder, self.salient_sentences, self.summarize_chars).await
        } else {
            buffer.to_string()
        };

        let mut system = JUDGE_INSTRUCTION.to_string();
        if !ctx.instructions.is_empty() {
            system.push_str("\n\nThe assistant must follow these instructions:\n");
            for line in &ctx.instructions {
                system.push_str("- ");
                system.push_str(line);
                system.push('\n');
            }
        }
        let prompt = format!("User asked:\n{}\n\nReply so far:\n{}", ctx.user_input, excerpt);
        let request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(prompt)], self.max_tokens, 0.0);

        match judge.complete(request).await {
            Ok(resp) => match parse_judgement(&resp.content) {
                Some(reason) => {
                    tracing::info!(judge = judge.name(), %reason, "observer interrupted stream");
                    self.interrupt_reason = Some(reason);
                    Verdict::Interrupt
                }
                None => Verdict::Continue,
            },
            Err(e) => {
                tracing::warn!(judge = judge.name(), error = %e, "observer judge failed, continuing");
                Verdict::Continue
            }
        }
    }
}

/// `Some(reason)` when the judge asked to interrupt. Anything unrecognized continues.
pub fn parse_judgement(reply: &str) -> Option<String> {
    const KEYWORD: &str = "interrupt";
    let line = reply.trim().lines().next().unwrap_or_default().trim();
    let token = line.split_whitespace().next()?;
    let rest = if token.eq_ignore_ascii_case(KEYWORD) {
        let rest = line[token.len()..].trim_start();
        rest.strip_prefix(':').unwrap_or(rest)
    } else if token.get(..=KEYWORD.len()).is_some_and(|head| head.eq_ignore_ascii_case("interrupt:")) {
        &line[KEYWORD.len() + 1..]
    } else {
        return None;
    };
    let reason = rest.trim();
    Some(if reason.is_empty() { DEFAULT_REASON.to_string() } else { reason.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaia_llm::provider::MockProvider;

    fn ctx() -> ObserverContext {
        ObserverContext { user_input: "tell me a story".into(), instructions: vec!["be kind".into()] }
    }

    #[test]
    fn parses_judge_replies() {
        assert_eq!(parse_judgement("INTERRUPT: repetition detected"), Some("repetition detected".into()));
        assert_eq!(parse_judgement("interrupt:off topic\nmore"), Some("off topic".into()));
        assert_eq!(parse_judgement("Interrupt"), Some(DEFAULT_REASON.into()));
        assert_eq!(parse_judgement("CONTINUE"), None);
        assert_eq!(parse_judgement("I think we should INTERRUPT: x"), None);
        assert_eq!(parse_judgement(""), None);
        assert_eq!(parse_judgement("ok"), None);
        assert_eq!(parse_judgement("INTERRUPT : drifting"), Some("drifting".into()));
        assert_eq!(parse_judgement("Interruption is not needed, CONTINUE"), None);
        assert_eq!(parse_judgement("interrupting now would be premature"), None);
        assert_eq!(parse_judgement("INTERRUPTED: x"), None);
    }

    #[tokio::test]
    async fn no_judge_always_continues() {
        let cfg = GaiaCfg::default();
        let mut obs = StreamObserver::new(None, &cfg);
        for buffer in ["", "error exception", &"x".repeat(5000)] {
            assert_eq!(obs.observe(buffer, &ctx()).await, Verdict::Continue);
        }
        assert!(!obs.interrupted());
    }

    #[tokio::test]
    async fn interrupt_is_recorded_once() {
        let cfg = GaiaCfg::default();
        let judge = MockProvider::scripted(["INTERRUPT: first", "INTERRUPT: second"]);
        let mut obs = StreamObserver::new(Some(&judge), &cfg);
        assert_eq!(obs.observe("a b c", &ctx()).await, Verdict::Interrupt);
        assert_eq!(obs.observe("a b c d", &ctx()).await, Verdict::Interrupt);
        assert_eq!(obs.interrupt_reason(), Some("first"));
        assert_eq!(judge.call_count(), 1);
    }

    #[tokio::test]
    async fn judge_failure_and_garbage_continue() {
        let cfg = GaiaCfg::default();
        let failing = MockProvider::failing("down");
        let mut obs = StreamObserver::new(Some(&failing), &cfg);
        assert_eq!(obs.observe("text", &ctx()).await, Verdict::Continue);

        let chatty = MockProvider::new("Looks fine to me!");
        let mut obs = StreamObserver::new(Some(&chatty), &cfg);
        assert_eq!(obs.observe("text", &ctx()).await, Verdict::Continue);
    }

    #[tokio::test]
    async fn long_buffers_are_reduced_before_judging() {
        let cfg = GaiaCfg { observer_summarize_chars: 40, observer_salient_sentences: 2, ..GaiaCfg::default() };
        let judge = MockProvider::new("CONTINUE");
        let embedder = MockProvider::new("");
        let mut obs = StreamObserver::new(Some(&judge), &cfg).with_embedder(Some(&embedder));
        let buffer = "The cat sat. The cat ran. A dog barked loudly. The cat slept. Rain fell all day.";
        assert_eq!(obs.observe(buffer, &ctx()).await, Verdict::Continue);
        let sent = &judge.requests()[0].messages[1].content;
        assert!(!sent.contains(buffer));
        assert!(sent.starts_with("User asked:\ntell me a story"));
        assert!(judge.requests()[0].messages[0].content.contains("- be kind"));
    }
}
