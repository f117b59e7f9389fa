//! Canonical normalization of raw model replies.
//!
//! Backends answer in several shapes: chat completions
//! (`choices[0].message.content`), plain completions (`choices[0].text`),
//! streaming deltas (`choices[0].delta.content`), Anthropic content blocks,
//! or occasionally a bare JSON string. Everything entering the system goes
//! through [`RawReply::from_value`] once, so the rest of the code only deals
//! with plain text.

use serde_json::Value;

/// One raw reply, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    /// `choices[0].message.content`
    Message(String),
    /// `choices[0].text`
    Text(String),
    /// `choices[0].delta.content` — `None` for role-only or empty deltas.
    Delta(Option<String>),
    /// Anthropic-style `content: [{type: "text", text}]`, concatenated.
    Blocks(String),
    /// The reply itself was a JSON string.
    Bare(String),
    /// Nothing recognizable; kept so it can still be stringified.
    Unrecognized(Value),
}

impl RawReply {
    pub fn from_value(value: Value) -> Self {
        if let Value::String(s) = value {
            return Self::Bare(s);
        }

        if let Some(choice) = value.get("choices").and_then(|c| c.get(0)) {
            if let Some(content) = choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
            {
                return Self::Message(content.to_owned());
            }
            if let Some(text) = choice.get("text").and_then(Value::as_str) {
                return Self::Text(text.to_owned());
            }
            if let Some(delta) = choice.get("delta") {
                let content = delta
                    .get("content")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned);
                return Self::Delta(content);
            }
        }

        if let Some(blocks) = value.get("content").and_then(Value::as_array) {
            let text: String = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            return Self::Blocks(text);
        }

        Self::Unrecognized(value)
    }

    /// Plain text of the reply. Unrecognized shapes are stringified rather than dropped.
    pub fn into_text(self) -> String {
        match self {
            Self::Message(s) | Self::Text(s) | Self::Blocks(s) | Self::Bare(s) => s,
            Self::Delta(s) => s.unwrap_or_default(),
            Self::Unrecognized(v) => v.to_string(),
        }
    }
}
