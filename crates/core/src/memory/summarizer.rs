//! Conversation summarization and salient-sentence reduction.

use gaia_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider};

const EMPTY_SUMMARY: &str = "(No messages to summarize)";

const SUMMARY_INSTRUCTION: &str = "You are summarizing a conversation between a user and GAIA. \
     Provide a clear and concise summary of what was discussed.";

/// Summarize a message list with one model call. Empty input needs no call.
pub async fn summarize_messages(
    llm: &dyn LlmProvider,
    messages: &[ChatMessage],
    max_tokens: u32,
) -> Result<String, LlmError> {
    if messages.is_empty() {
        return Ok(EMPTY_SUMMARY.to_string());
    }
    let transcript: Vec<String> = messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect();
    summarize_text(llm, &transcript.join("\n"), max_tokens).await
}

/// Summarize free text (e.g. an oversized draft) with one model call.
pub async fn summarize_text(llm: &dyn LlmProvider, text: &str, max_tokens: u32) -> Result<String, LlmError> {
    if text.trim().is_empty() {
        return Ok(EMPTY_SUMMARY.to_string());
    }
    let request = CompletionRequest::new(
        vec![ChatMessage::system(SUMMARY_INSTRUCTION), ChatMessage::user(text)],
        max_tokens,
        0.3,
    );
    let response = llm.complete(request).await?;
    Ok(response.content.trim().to_string())
}

/// Split text into sentences, keeping terminal punctuation.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let end = i + c.len_utf8();
            let s = text[start..end].trim();
            if !s.is_empty() {
                out.push(s);
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

/// Last `max_chars` characters of `text`, cut on a char boundary.
pub fn tail_window(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Reduce `text` to its `keep` most salient sentences, ranked by cosine
/// similarity to the mean embedding of all sentences, returned in original
/// order. Without a working embedder the last `tail_chars` characters are kept.
/// The result never exceeds `tail_chars` characters.
pub async fn salient_sentences(
    text: &str,
    embedder: Option<&dyn LlmProvider>,
    keep: usize,
    tail_chars: usize,
) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= keep {
        return tail_window(text, tail_chars).to_string();
    }
    let Some(embedder) = embedder else {
        return tail_window(text, tail_chars).to_string();
    };

    let vectors = match embedder.embed(sentences.iter().map(|s| s.to_string()).collect()).await {
        Ok(v) if v.len() == sentences.len() && !v.is_empty() => v,
        Ok(v) => {
            tracing::warn!(expected = sentences.len(), got = v.len(), "embedding count mismatch, using tail window");
            return tail_window(text, tail_chars).to_string();
        }
        Err(e) => {
            tracing::warn!(error = %e, "embedding failed, using tail window");
            return tail_window(text, tail_chars).to_string();
        }
    };

    let dim = vectors[0].len();
    let mut mean = vec![0.0f32; dim];
    for v in &vectors {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    mean.iter_mut().for_each(|m| *m /= n);

    let mut ranked: Vec<(usize, f32)> = vectors.iter().map(|v| cosine(v, &mean)).enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut chosen: Vec<usize> = ranked.into_iter().take(keep).map(|(i, _)| i).collect();
    chosen.sort_unstable();

    let joined = chosen.into_iter().map(|i| sentences[i]).collect::<Vec<_>>().join(" ");
    tail_window(&joined, tail_chars).to_string()
}
