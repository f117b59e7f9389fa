use chrono::{DateTime, Utc};
use gaia_llm::provider::ChatMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Persona ────────────────────────────────────────────────────

/// Persona the assistant speaks as. Loaded by an outer surface; the core only
/// reads it when building prompts and running safety checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    /// Identity paragraph placed at the top of every system prompt.
    pub template: String,
    pub instructions: Vec<String>,
    pub traits: Vec<String>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "gaia".into(),
            template: "You are GAIA, a thoughtful personal assistant running on local models.".into(),
            instructions: vec![
                "Be honest about what you do not know.".into(),
                "Never reveal secrets, passwords or tokens.".into(),
            ],
            traits: vec!["curious".into(), "careful".into()],
        }
    }
}

// ── Dispatch ───────────────────────────────────────────────────

/// Complexity label produced by the dispatch classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

/// How much context the classifier thinks the turn needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextNeed {
    #[default]
    Minimal,
    Medium,
    Full,
}

impl ContextNeed {
    pub fn token_budget(self) -> u32 {
        match self {
            ContextNeed::Minimal => 1024,
            ContextNeed::Medium => 2048,
            ContextNeed::Full => 4096,
        }
    }
}

// ── Intent ─────────────────────────────────────────────────────

/// Fixed intent vocabulary. Model output outside it maps to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ReadFile,
    WriteFile,
    MarkTaskComplete,
    Reflect,
    Seed,
    Shell,
    Exit,
    Help,
    #[default]
    Other,
}

impl Intent {
    /// Intents a model may pick (reflex-only ones excluded).
    pub const MODEL_CHOICES: &'static [Intent] = &[
        Intent::ReadFile,
        Intent::WriteFile,
        Intent::MarkTaskComplete,
        Intent::Reflect,
        Intent::Seed,
        Intent::Shell,
        Intent::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::ReadFile => "read_file",
            Intent::WriteFile => "write_file",
            Intent::MarkTaskComplete => "mark_task_complete",
            Intent::Reflect => "reflect",
            Intent::Seed => "seed",
            Intent::Shell => "shell",
            Intent::Exit => "exit",
            Intent::Help => "help",
            Intent::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::MODEL_CHOICES
            .iter()
            .chain([Intent::Exit, Intent::Help].iter())
            .copied()
            .find(|i| i.as_str() == s)
    }
}

// ── Turn ───────────────────────────────────────────────────────

/// Ephemeral per-turn state, mutated as the turn advances.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub turn_id: Uuid,
    pub session_id: String,
    pub user_input: String,
    /// Session history, oldest first. Insertion order is significant.
    pub history: Vec<ChatMessage>,
    pub instructions: Vec<String>,
    pub intent: Intent,
    pub token_budget: u32,
    pub model: String,
    pub plan: Option<String>,
    pub refined_plan: Option<String>,
    pub response: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl TurnContext {
    pub fn new(session_id: impl Into<String>, user_input: impl Into<String>, persona: &Persona) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_input: user_input.into(),
            history: Vec::new(),
            instructions: persona.instructions.clone(),
            intent: Intent::Other,
            token_budget: ContextNeed::Minimal.token_budget(),
            model: String::new(),
            plan: None,
            refined_plan: None,
            response: None,
            started_at: Utc::now(),
        }
    }
}

// ── Streaming ──────────────────────────────────────────────────

/// One event of a voice stream. After `Interruption` the stream yields nothing more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Interruption(String),
}

// ── Routed output ──────────────────────────────────────────────

/// Structured view of one raw model response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutedOutput {
    pub plan: Option<String>,
    pub execute: Vec<String>,
    pub thought_seed: Option<String>,
    /// The only segment shown to the user.
    pub response: String,
}

// ── Actions ────────────────────────────────────────────────────

/// Progress of `EXECUTE:` commands found in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionEvent {
    ActionStart,
    ActionReflect { command: String },
    ActionBlocked { command: String, reason: String },
    ActionExecuting { command: String },
    ActionSuccess { command: String, output: String },
    ActionFailure { command: String, error: String },
    ActionEnd,
}

/// Progress events a surface may render while a turn runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Token(String),
    Interruption(String),
    Action(ActionEvent),
}

/// What a finished turn hands back to the surface.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    /// User-visible text: the routed response or a fixed fallback.
    pub response: String,
    pub intent: Intent,
    /// Responder model name; `None` when the turn never reached a model.
    pub model: Option<String>,
    pub routed: Option<RoutedOutput>,
    pub actions: Vec<ActionEvent>,
    pub interrupted: Option<String>,
    pub thought_seed: Option<String>,
}

impl TurnOutcome {
    pub fn fixed(turn_id: Uuid, response: impl Into<String>, intent: Intent) -> Self {
        Self {
            turn_id,
            response: response.into(),
            intent,
            model: None,
            routed: None,
            actions: Vec::new(),
            interrupted: None,
            thought_seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_need_budgets() {
        assert_eq!(ContextNeed::Minimal.token_budget(), 1024);
        assert_eq!(ContextNeed::Medium.token_budget(), 2048);
        assert_eq!(ContextNeed::Full.token_budget(), 4096);
    }

    #[test]
    fn intent_names_parse_back() {
        for intent in Intent::MODEL_CHOICES.iter().chain([Intent::Exit, Intent::Help].iter()) {
            assert_eq!(Intent::parse(intent.as_str()), Some(*intent));
        }
        assert_eq!(Intent::parse("dance"), None);
    }

    #[test]
    fn action_event_serializes_with_type_tag() {
        let ev = ActionEvent::ActionFailure { command: "ai.x()".into(), error: "nope".into() };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "action_failure");
        assert_eq!(v["error"], "nope");
    }

    #[test]
    fn new_turn_defaults() {
        let ctx = TurnContext::new("s1", "hello", &Persona::default());
        assert_eq!(ctx.token_budget, 1024);
        assert_eq!(ctx.intent, Intent::Other);
        assert!(ctx.history.is_empty());
    }
}
