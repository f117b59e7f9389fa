use crate::types::{Persona, TurnContext};
use gaia_llm::provider::ChatMessage;

/// Output contract appended to every responder system prompt.
const MARKER_SECTION: &str = "Structure your answer with these line-leading markers:\n\
    RESPONSE: the reply the user will see (required)\n\
    EXECUTE: one call such as ai.read(\"path\"), ai.write(\"path\", \"content\"), ai.shell(\"ls -la\") or ai.seed(\"note\") (optional, one per line)\n\
    THOUGHT_SEED: one sentence worth revisiting later (optional)\n\
    Never claim an action succeeded unless its result is shown to you.";

const PLAN_SECTION: &str = "Before answering, think about how to handle the request. \
    Reply with a short plan only, starting with PLAN:. Do not answer the user yet.";

fn persona_section(persona: &Persona, instructions: &[String]) -> String {
    let mut out = persona.template.clone();
    if !persona.traits.is_empty() {
        out.push_str(&format!("\nYour traits: {}.", persona.traits.join(", ")));
    }
    if !instructions.is_empty() {
        out.push_str("\n\n## Instructions");
        for line in instructions {
            out.push_str("\n- ");
            out.push_str(line);
        }
    }
    out
}

fn with_history(system: String, ctx: &TurnContext) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(ctx.history.len() + 3);
    messages.push(ChatMessage::system(system));
    messages.extend(ctx.history.iter().cloned());
    messages.push(ChatMessage::user(ctx.user_input.clone()));
    messages
}

/// Messages for the non-streamed planning call.
pub fn plan_messages(persona: &Persona, ctx: &TurnContext) -> Vec<ChatMessage> {
    let system = format!("{}\n\n{PLAN_SECTION}", persona_section(persona, &ctx.instructions));
    with_history(system, ctx)
}

/// Messages for the streamed response. The refined plan, if any, follows the
/// user input as the assistant's own prior message.
pub fn response_messages(persona: &Persona, ctx: &TurnContext) -> Vec<ChatMessage> {
    let system = format!("{}\n\n{MARKER_SECTION}", persona_section(persona, &ctx.instructions));
    let mut messages = with_history(system, ctx);
    if let Some(plan) = ctx.refined_plan.as_deref().filter(|p| !p.trim().is_empty()) {
        messages.push(ChatMessage::assistant(format!("PLAN: {plan}")));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaia_llm::provider::Role;

    fn ctx() -> TurnContext {
        let mut ctx = TurnContext::new("s", "what's next?", &Persona::default());
        ctx.history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];
        ctx
    }

    #[test]
    fn response_messages_layout() {
        let mut c = ctx();
        c.refined_plan = Some("check the calendar".into());
        let msgs = response_messages(&Persona::default(), &c);
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("RESPONSE:"));
        assert!(msgs[0].content.contains("- Never reveal secrets"));
        assert_eq!(msgs[1].content, "earlier");
        assert_eq!(msgs[3].content, "what's next?");
        assert_eq!(msgs[4], ChatMessage::assistant("PLAN: check the calendar"));
    }

    #[test]
    fn no_plan_no_assistant_tail() {
        let msgs = response_messages(&Persona::default(), &ctx());
        assert_eq!(msgs.last().unwrap().role, Role::User);
    }

    #[test]
    fn plan_prompt_asks_for_plan() {
        let msgs = plan_messages(&Persona::default(), &ctx());
        assert!(msgs[0].content.ends_with(PLAN_SECTION));
        assert!(msgs[0].content.starts_with("You are GAIA"));
    }
}
