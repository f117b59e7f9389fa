//! Runs the `EXECUTE:` commands of one response, each after a second opinion.

use super::{CommandError, SafeExecutor};
use crate::cognition::reflection::Reflector;
use crate::cognition::safety::SafetyChecker;
use crate::types::{ActionEvent, Persona};

/// Longest reflection excerpt carried in a blocked-action reason.
const REASON_CHARS: usize = 200;

pub struct ActionRunner<'a> {
    executor: &'a SafeExecutor,
    safety: &'a dyn SafetyChecker,
    reflector: Option<Reflector<'a>>,
    persona: &'a Persona,
}

impl<'a> ActionRunner<'a> {
    /// Without a reflector, commands get the safety check only.
    pub fn new(
        executor: &'a SafeExecutor,
        safety: &'a dyn SafetyChecker,
        reflector: Option<Reflector<'a>>,
        persona: &'a Persona,
    ) -> Self {
        Self { executor, safety, reflector, persona }
    }

    /// Execute `commands` in order. Every event is passed to `emit` and
    /// returned. A failing command never stops the remaining ones.
    pub async fn run(&self, user_input: &str, commands: &[String], mut emit: impl FnMut(&ActionEvent)) -> Vec<ActionEvent> {
        let mut events = Vec::new();
        if commands.is_empty() {
            return events;
        }
        let mut push = |ev: ActionEvent, events: &mut Vec<ActionEvent>| {
            emit(&ev);
            events.push(ev);
        };

        push(ActionEvent::ActionStart, &mut events);
        for command in commands {
            let command = command.trim().to_string();
            push(ActionEvent::ActionReflect { command: command.clone() }, &mut events);

            if let Some(reason) = self.second_opinion(user_input, &command).await {
                tracing::warn!(%command, %reason, "action blocked");
                push(ActionEvent::ActionBlocked { command, reason }, &mut events);
                continue;
            }

            push(ActionEvent::ActionExecuting { command: command.clone() }, &mut events);
            match self.executor.execute(&command).await {
                Ok(output) => {
                    tracing::info!(%command, "action succeeded");
                    push(ActionEvent::ActionSuccess { command, output }, &mut events);
                }
                Err(e) => {
                    match &e {
                        CommandError::Rejected(_) => tracing::warn!(%command, error = %e, "action rejected"),
                        CommandError::Failed(_) => tracing::error!(%command, error = %e, "action failed"),
                    }
                    push(ActionEvent::ActionFailure { command, error: e.to_string() }, &mut events);
                }
            }
        }
        push(ActionEvent::ActionEnd, &mut events);
        events
    }

    /// `Some(reason)` when the command must not run.
    async fn second_opinion(&self, user_input: &str, command: &str) -> Option<String> {
        let Some(reflector) = &self.reflector else {
            let report = self.safety.check(command, &self.persona.traits, &self.persona.instructions);
            return (!report.safe).then(|| report.reason.unwrap_or_else(|| "failed safety check".into()));
        };
        let refinement = reflector
            .reflect_and_refine(user_input, command, self.persona, &self.persona.instructions)
            .await;
        if !refinement.rejected() {
            return None;
        }
        Some(match refinement.safety.reason {
            Some(reason) if !refinement.safety.safe => reason,
            _ => refinement.text.chars().take(REASON_CHARS).collect(),
        })
    }
}
