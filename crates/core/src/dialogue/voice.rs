//! Streaming transport: pulls tokens from the responder and consults the
//! observer at a bounded cadence.

use crate::config::GaiaCfg;
use crate::dialogue::observer::{ObserverContext, StreamObserver, Verdict};
use crate::types::StreamEvent;
use gaia_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider, TokenStream};

/// Responder wrapper that turns a message list into a [`VoiceStream`].
pub struct ExternalVoice<'a> {
    responder: &'a dyn LlmProvider,
    observer: Option<StreamObserver<'a>>,
    context: ObserverContext,
    cfg: &'a GaiaCfg,
}

impl<'a> ExternalVoice<'a> {
    pub fn new(responder: &'a dyn LlmProvider, cfg: &'a GaiaCfg) -> Self {
        Self { responder, observer: None, context: ObserverContext::default(), cfg }
    }

    pub fn with_observer(mut self, observer: StreamObserver<'a>, context: ObserverContext) -> Self {
        self.observer = Some(observer);
        self.context = context;
        self
    }

    /// Start the streamed completion.
    pub async fn stream_response(self, messages: Vec<ChatMessage>, max_tokens: u32) -> Result<VoiceStream<'a>, LlmError> {
        let mut request = CompletionRequest::new(messages, max_tokens, self.cfg.response_temperature);
        request.top_p = self.cfg.response_top_p;
        let tokens = self.responder.stream(request).await?;
        tracing::debug!(responder = self.responder.name(), observed = self.observer.is_some(), "stream started");
        Ok(VoiceStream {
            tokens: Some(tokens),
            observer: self.observer,
            context: self.context,
            buffer: String::new(),
            since_check: 0,
            check_due: false,
            threshold: self.cfg.observer_token_threshold.max(1),
            stops: self.cfg.logical_stop_punctuation.chars().collect(),
        })
    }

    /// Consume the whole stream. Text accumulated before an interruption is kept.
    pub async fn generate_full_response(
        self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        mut on_event: impl FnMut(&StreamEvent),
    ) -> Result<FullResponse, LlmError> {
        let mut stream = self.stream_response(messages, max_tokens).await?;
        let mut interrupted = None;
        while let Some(event) = stream.next().await {
            on_event(&event);
            if let StreamEvent::Interruption(reason) = event {
                interrupted = Some(reason);
            }
        }
        Ok(FullResponse { text: stream.into_text(), interrupted })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullResponse {
    pub text: String,
    pub interrupted: Option<String>,
}

/// Pull-based event stream. Tokens arrive in generation order; an
/// `Interruption` is always the final event.
pub struct VoiceStream<'a> {
    /// `None` once finished; dropping it abandons the model call.
    tokens: Option<TokenStream>,
    observer: Option<StreamObserver<'a>>,
    context: ObserverContext,
    buffer: String,
    since_check: usize,
    check_due: bool,
    threshold: usize,
    stops: Vec<char>,
}

impl VoiceStream<'_> {
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.tokens.as_ref()?;

        if self.check_due {
            self.check_due = false;
            self.since_check = 0;
            if let Some(observer) = self.observer.as_mut()
                && observer.observe(&self.buffer, &self.context).await == Verdict::Interrupt
            {
                self.tokens = None;
                let reason = observer.interrupt_reason().unwrap_or("Interrupted by observer.").to_string();
                tracing::info!(%reason, chars = self.buffer.len(), "stream interrupted");
                return Some(StreamEvent::Interruption(reason));
            }
        }

        let rx = self.tokens.as_mut()?;
        loop {
            match rx.recv().await {
                None => {
                    self.tokens = None;
                    return None;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, chars = self.buffer.len(), "stream ended with error");
                    self.tokens = None;
                    return None;
                }
                Some(Ok(token)) if token.is_empty() => continue,
                Some(Ok(token)) => {
                    self.buffer.push_str(&token);
                    self.since_check += 1;
                    self.check_due = self.since_check >= self.threshold || token.chars().any(|c| self.stops.contains(&c));
                    return Some(StreamEvent::Token(token));
                }
            }
        }
    }

    /// Everything yielded so far.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn into_text(self) -> String {
        self.buffer
    }
}
