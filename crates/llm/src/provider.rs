use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role name. Unknown names map to `User`.
    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl CompletionRequest {
    /// Request with `top_p = 1.0`.
    pub fn new(messages: Vec<ChatMessage>, max_tokens: u32, temperature: f32) -> Self {
        Self { messages, max_tokens, temperature, top_p: 1.0 }
    }
}

/// LLM completion response, already normalized to plain text.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Error type for LLM operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("stream closed: {0}")]
    StreamClosed(String),
}

/// Incremental token deltas. Dropping the receiver abandons the underlying call.
pub type TokenStream = mpsc::Receiver<Result<String, LlmError>>;

pub type LlmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

/// Wrap an already-complete text as a one-chunk token stream.
pub fn single_chunk(text: String) -> TokenStream {
    let (tx, rx) = mpsc::channel(1);
    // capacity 1, fresh channel: cannot be full
    let _ = tx.try_send(Ok(text));
    rx
}

/// Trait for model backends (local llama.cpp/Ollama servers, OpenAI, Claude, ...).
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, request: CompletionRequest) -> LlmFuture<'_, CompletionResponse>;

    /// Streamed completion. Backends without native streaming deliver the
    /// whole completion as one chunk.
    fn stream(&self, request: CompletionRequest) -> LlmFuture<'_, TokenStream> {
        Box::pin(async move {
            let response = self.complete(request).await?;
            Ok(single_chunk(response.content))
        })
    }

    /// One embedding vector per input text.
    fn embed(&self, _texts: Vec<String>) -> LlmFuture<'_, Vec<Vec<f32>>> {
        let name = self.name().to_owned();
        Box::pin(async move { Err(LlmError::Unavailable(format!("{name} has no embedding endpoint"))) })
    }
}

/// Embedding dimension of the deterministic mock embedder.
const MOCK_EMBED_DIM: usize = 16;

/// Deterministic bag-of-words embedding: texts sharing words land close together.
pub fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; MOCK_EMBED_DIM];
    for word in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        let slot = (hasher.finish() % MOCK_EMBED_DIM as u64) as usize;
        v[slot] += 1.0;
    }
    v
}

/// Mock provider for testing — replays a script of replies.
///
/// Each call pops the next scripted reply; once the script is exhausted the
/// last reply repeats. `stream` splits the reply into word tokens.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Result<String, String>>,
    stream_tokens: Option<Vec<String>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    /// Always replies with `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self::from_script(Vec::new(), Ok(response.into()))
    }

    /// Replies with each entry in turn, then keeps repeating the last one.
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut script: VecDeque<Result<String, String>> =
            replies.into_iter().map(|s| Ok(s.into())).collect();
        let last = script.pop_back().unwrap_or_else(|| Ok(String::new()));
        let mut provider = Self::from_script(Vec::new(), last.clone());
        script.push_back(last);
        provider.script = Mutex::new(script);
        provider
    }

    /// Every call fails with `RequestFailed(message)`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::from_script(Vec::new(), Err(message.into()))
    }

    fn from_script(script: Vec<Result<String, String>>, last: Result<String, String>) -> Self {
        Self {
            name: "mock".into(),
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            stream_tokens: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fix the exact token sequence `stream` yields.
    pub fn with_stream_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_tokens = Some(tokens.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of `complete`/`stream` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_reply(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);
        let popped = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let reply = match popped {
            Some(r) => r,
            None => self.last.lock().unwrap_or_else(PoisonError::into_inner).clone(),
        };
        reply.map_err(LlmError::RequestFailed)
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, request: CompletionRequest) -> LlmFuture<'_, CompletionResponse> {
        let reply = self.next_reply(request);
        Box::pin(async move {
            Ok(CompletionResponse { content: reply?, input_tokens: 10, output_tokens: 20 })
        })
    }

    fn stream(&self, request: CompletionRequest) -> LlmFuture<'_, TokenStream> {
        let reply = self.next_reply(request);
        let fixed = self.stream_tokens.clone();
        Box::pin(async move {
            let text = reply?;
            let tokens: Vec<String> = match fixed {
                Some(tokens) => tokens,
                None => text.split_inclusive(' ').map(str::to_owned).collect(),
            };
            let (tx, rx) = mpsc::channel(tokens.len().max(1));
            for token in tokens {
                let _ = tx.try_send(Ok(token));
            }
            Ok(rx)
        })
    }

    fn embed(&self, texts: Vec<String>) -> LlmFuture<'_, Vec<Vec<f32>>> {
        Box::pin(async move { Ok(texts.iter().map(|t| hashed_embedding(t)).collect()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user(text)], 100, 0.7)
    }

    #[tokio::test]
    async fn mock_provider_returns_response() {
        let mock = MockProvider::new("hello gaia");
        let resp = mock.complete(request("hi")).await.unwrap();
        assert_eq!(resp.content, "hello gaia");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_replies_then_repeat_last() {
        let mock = MockProvider::scripted(["one", "two"]);
        assert_eq!(mock.complete(request("a")).await.unwrap().content, "one");
        assert_eq!(mock.complete(request("b")).await.unwrap().content, "two");
        assert_eq!(mock.complete(request("c")).await.unwrap().content, "two");
        assert_eq!(mock.requests().len(), 3);
        assert_eq!(mock.requests()[1].messages[0].content, "b");
    }

    #[tokio::test]
    async fn failing_mock_errors() {
        let mock = MockProvider::failing("boom");
        let err = mock.complete(request("x")).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(ref m) if m == "boom"));
    }

    #[tokio::test]
    async fn stream_splits_into_word_tokens() {
        let mock = MockProvider::new("hello there friend");
        let mut rx = mock.stream(request("x")).await.unwrap();
        let mut tokens = Vec::new();
        while let Some(tok) = rx.recv().await {
            tokens.push(tok.unwrap());
        }
        assert_eq!(tokens, vec!["hello ", "there ", "friend"]);
    }

    #[tokio::test]
    async fn default_stream_is_single_chunk() {
        struct Plain;
        impl LlmProvider for Plain {
            fn name(&self) -> &str {
                "plain"
            }
            fn complete(&self, _r: CompletionRequest) -> LlmFuture<'_, CompletionResponse> {
                Box::pin(async {
                    Ok(CompletionResponse { content: "whole".into(), input_tokens: 0, output_tokens: 0 })
                })
            }
        }
        let mut rx = Plain.stream(request("x")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), "whole");
        assert!(rx.recv().await.is_none());
        assert!(Plain.embed(vec!["a".into()]).await.is_err());
    }

    #[test]
    fn hashed_embedding_is_deterministic() {
        assert_eq!(hashed_embedding("a b c"), hashed_embedding("a b c"));
        assert_eq!(hashed_embedding("").len(), MOCK_EMBED_DIM);
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), role);
        }
    }
}
