//! HTTP-based LLM providers.
//!
//! Supports OpenAI-compatible APIs (local llama.cpp / Ollama / vLLM servers,
//! OpenAI, Google Gemini, DeepSeek) and Anthropic's native Messages API.
//! Every reply body is normalized through [`RawReply`].

use crate::provider::{
    single_chunk, CompletionRequest, CompletionResponse, LlmError, LlmFuture, LlmProvider, Role,
    TokenStream,
};
use crate::reply::RawReply;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Inferred provider kind from model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    /// Local or unknown model — OpenAI-compatible server on localhost.
    Local,
}

impl ProviderKind {
    /// Infer provider from model name prefix.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.starts_with("gpt-")
            || m.starts_with("o1-")
            || m.starts_with("o3-")
            || m.starts_with("o4-")
            || m.starts_with("text-embedding-")
        {
            Self::OpenAi
        } else if m.starts_with("claude-") {
            Self::Anthropic
        } else if m.starts_with("gemini-") {
            Self::Google
        } else if m.starts_with("deepseek-") {
            Self::DeepSeek
        } else {
            Self::Local
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com",
            Self::Local => "http://localhost:8080/v1",
        }
    }

    fn is_anthropic(self) -> bool {
        matches!(self, Self::Anthropic)
    }
}

// ── Request bodies ──

#[derive(Serialize)]
struct OaiRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

// ── Provider ──

/// HTTP-based LLM provider. Handles both OpenAI-compatible and Anthropic APIs.
pub struct HttpProvider {
    kind: ProviderKind,
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Build from model name + API key + optional base URL override.
    /// An empty API key sends no auth header (typical for local servers).
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let kind = ProviderKind::from_model(&model);
        let base = base_url.unwrap_or_else(|| kind.default_base_url().to_owned());
        Self {
            kind,
            model,
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        if self.kind.is_anthropic() {
            format!("{}/v1/messages", self.base_url)
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn embeddings_endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    fn oai_body<'a>(&'a self, request: &'a CompletionRequest, stream: bool) -> OaiRequest<'a> {
        OaiRequest {
            model: &self.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage { role: m.role.as_str(), content: &m.content })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stream,
        }
    }
}

/// Parse error response, returning RateLimited for 429.
fn check_error(status: reqwest::StatusCode, body: String) -> LlmError {
    if status.as_u16() == 429 {
        LlmError::RateLimited
    } else {
        LlmError::RequestFailed(format!("{status}: {body}"))
    }
}

async fn send_checked(builder: reqwest::RequestBuilder) -> Result<reqwest::Response, LlmError> {
    let resp = builder.send().await.map_err(|e| LlmError::RequestFailed(e.to_string()))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(check_error(status, text));
    }
    Ok(resp)
}

fn usage_of(body: &Value) -> (u32, u32) {
    let usage = body.get("usage");
    let read = |keys: [&str; 2]| {
        keys.iter()
            .find_map(|k| usage.and_then(|u| u.get(*k)).and_then(Value::as_u64))
            .unwrap_or(0) as u32
    };
    (read(["prompt_tokens", "input_tokens"]), read(["completion_tokens", "output_tokens"]))
}

/// Outcome of one server-sent-events line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(v) => match RawReply::from_value(v) {
            RawReply::Delta(Some(t)) => SseLine::Token(t),
            _ => SseLine::Skip,
        },
        Err(_) => SseLine::Skip,
    }
}

/// Splits a byte stream into lines. Bytes are decoded only once a whole line
/// has arrived, so a character split across chunks stays intact.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            match String::from_utf8(raw) {
                Ok(line) => lines.push(line),
                Err(e) => tracing::warn!(error = %e, "dropping non-utf8 stream line"),
            }
        }
        lines
    }
}

impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        match self.kind {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Local => "local",
        }
    }

    fn complete(&self, request: CompletionRequest) -> LlmFuture<'_, CompletionResponse> {
        if self.kind.is_anthropic() {
            Box::pin(self.complete_anthropic(request))
        } else {
            Box::pin(self.complete_openai(request))
        }
    }

    fn stream(&self, request: CompletionRequest) -> LlmFuture<'_, TokenStream> {
        if self.kind.is_anthropic() {
            Box::pin(async move {
                let response = self.complete_anthropic(request).await?;
                Ok(single_chunk(response.content))
            })
        } else {
            Box::pin(self.stream_openai(request))
        }
    }

    fn embed(&self, texts: Vec<String>) -> LlmFuture<'_, Vec<Vec<f32>>> {
        Box::pin(async move {
            if self.kind.is_anthropic() {
                return Err(LlmError::Unavailable("anthropic has no embedding endpoint".into()));
            }
            let body = EmbeddingRequest { model: &self.model, input: &texts };
            let resp =
                send_checked(self.authed(self.client.post(self.embeddings_endpoint())).json(&body))
                    .await?;
            let api: Value = resp.json().await.map_err(|e| LlmError::RequestFailed(e.to_string()))?;
            let data = api
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| LlmError::RequestFailed("embedding reply without data".into()))?;
            Ok(data
                .iter()
                .map(|d| {
                    d.get("embedding")
                        .and_then(Value::as_array)
                        .map(|xs| xs.iter().filter_map(Value::as_f64).map(|x| x as f32).collect())
                        .unwrap_or_default()
                })
                .collect())
        })
    }
}

impl HttpProvider {
    /// OpenAI-compatible completion (local servers, OpenAI, Gemini, DeepSeek).
    async fn complete_openai(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.oai_body(&request, false);
        let resp = send_checked(self.authed(self.client.post(self.endpoint())).json(&body)).await?;
        let api: Value = resp.json().await.map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        let (input_tokens, output_tokens) = usage_of(&api);
        let content = RawReply::from_value(api).into_text();
        Ok(CompletionResponse { content, input_tokens, output_tokens })
    }

    /// OpenAI-compatible SSE streaming. The pump task stops as soon as the
    /// receiver is dropped, abandoning the HTTP body.
    async fn stream_openai(&self, request: CompletionRequest) -> Result<TokenStream, LlmError> {
        let body = self.oai_body(&request, true);
        let mut resp = send_checked(self.authed(self.client.post(self.endpoint())).json(&body)).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut buffer = SseBuffer::default();
            loop {
                let chunk = match resp.chunk().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::StreamClosed(e.to_string()))).await;
                        return;
                    }
                };
                for line in buffer.push(&chunk) {
                    match parse_sse_line(&line) {
                        SseLine::Token(t) => {
                            if tx.send(Ok(t)).await.is_err() {
                                tracing::debug!("token receiver dropped, abandoning stream");
                                return;
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Anthropic Messages API completion.
    async fn complete_anthropic(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // Anthropic puts the system prompt at top level.
        let system = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str());
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| WireMessage { role: m.role.as_str(), content: &m.content })
            .collect();

        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system,
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
        };

        let builder = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);
        let resp = send_checked(builder).await?;
        let api: Value = resp.json().await.map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        let (input_tokens, output_tokens) = usage_of(&api);
        let content = RawReply::from_value(api).into_text();
        Ok(CompletionResponse { content, input_tokens, output_tokens })
    }
}

/// Build a provider from environment variables.
/// Reads `<model_env_key>`, optionally `GAIA_LLM_API_KEY` and `GAIA_LLM_BASE_URL`.
/// Returns `None` if the model variable is not set.
pub fn from_env_with_model_var(model_env_key: &str) -> Option<HttpProvider> {
    let model = std::env::var(model_env_key).ok().filter(|m| !m.trim().is_empty())?;
    let api_key = std::env::var("GAIA_LLM_API_KEY").unwrap_or_default();
    let base_url = std::env::var("GAIA_LLM_BASE_URL").ok();
    Some(HttpProvider::new(model, api_key, base_url))
}
