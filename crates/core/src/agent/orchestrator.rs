//! Turn orchestration: dispatch, gather context, plan, reflect, stream, route,
//! act, post-process.
//!
//! Every model role is a [`ModelLease`] from the shared pool. Leases are held
//! only for the step that needs them, and a turn never waits on the pool while
//! holding another lease.

use std::sync::Arc;

use gaia_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider, Role};
use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;

use crate::capability::actions::ActionRunner;
use crate::capability::{SafeExecutor, SafeShell, files};
use crate::cognition::reflection::Reflector;
use crate::cognition::safety::{KeywordSafetyChecker, SafetyChecker};
use crate::cognition::thought_seed::{self, SeedContext, SeedStore};
use crate::cognition::{dispatch, intent, prompt, routing};
use crate::config::GaiaCfg;
use crate::dialogue::{ExternalVoice, FullResponse, ObserverContext, StreamObserver};
use crate::io::{ActivityClock, ChatTranscript};
use crate::memory::{SessionStore, summarizer};
use crate::models::pool::{EMBED, LITE, PRIME};
use crate::models::{ModelLease, ModelPool, ModelStatus};
use crate::types::{ActionEvent, Intent, Persona, StreamEvent, TurnContext, TurnEvent, TurnOutcome};

pub const DISPATCH_UNAVAILABLE: &str =
    "I'm sorry, no model is available to handle that right now. Please try again in a moment.";
pub const STREAM_FAILED: &str = "I'm sorry, something went wrong while I was answering. Please try again.";
pub const GOODBYE: &str = "Goodbye.";
pub const HELP_TEXT: &str = "Talk to me in plain language. Shortcuts:\n\
    \x20 ls, cat <file>, pwd   run a whitelisted shell command\n\
    \x20 help, ?               show this message\n\
    \x20 exit, quit, bye       end the session";

const SUMMARY_MAX_TOKENS: u32 = 256;

/// A model serving a secondary role: the responder itself or a separate lease.
enum Helper<'a> {
    Responder(&'a ModelLease),
    Leased(ModelLease),
}

impl Helper<'_> {
    fn lease(&self) -> &ModelLease {
        match self {
            Helper::Responder(lease) => *lease,
            Helper::Leased(lease) => lease,
        }
    }
}

fn send(events: Option<&UnboundedSender<TurnEvent>>, event: TurnEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Runs user turns against the model pool. Cheap to share behind an `Arc`;
/// concurrent turns contend only for pool models.
pub struct AgentCore {
    pool: ModelPool,
    sessions: Arc<dyn SessionStore>,
    cfg: Arc<GaiaCfg>,
    persona: Persona,
    safety: Arc<dyn SafetyChecker>,
    executor: SafeExecutor,
    seeds: SeedStore,
    transcript: ChatTranscript,
    clock: ActivityClock,
}

impl AgentCore {
    pub fn new(pool: ModelPool, sessions: Arc<dyn SessionStore>, cfg: Arc<GaiaCfg>) -> Self {
        let seeds = SeedStore::new(&cfg.seeds_dir);
        let executor = SafeExecutor::new(SafeShell::from_cfg(&cfg), seeds.clone());
        let transcript = ChatTranscript::new(&cfg.chat_log_path);
        Self {
            pool,
            sessions,
            persona: Persona::default(),
            safety: Arc::new(KeywordSafetyChecker::default()),
            executor,
            seeds,
            transcript,
            clock: ActivityClock::new(),
            cfg,
        }
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_safety(mut self, safety: Arc<dyn SafetyChecker>) -> Self {
        self.safety = safety;
        self
    }

    /// Share an activity clock with an idle loop.
    pub fn with_clock(mut self, clock: ActivityClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &ModelPool {
        &self.pool
    }

    pub fn cfg(&self) -> &GaiaCfg {
        &self.cfg
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn seeds(&self) -> &SeedStore {
        &self.seeds
    }

    pub fn clock(&self) -> &ActivityClock {
        &self.clock
    }

    /// Run one user turn. Progress is sent to `events` when given. Never fails:
    /// the outcome carries either the routed response or a fixed fallback.
    pub async fn run_turn(
        &self,
        session_id: &str,
        input: &str,
        events: Option<&UnboundedSender<TurnEvent>>,
    ) -> TurnOutcome {
        let ctx = TurnContext::new(session_id, input.trim(), &self.persona);
        let span = tracing::info_span!("turn", session_id, turn_id = %ctx.turn_id);
        self.drive(ctx, events).instrument(span).await
    }

    async fn drive(&self, mut ctx: TurnContext, events: Option<&UnboundedSender<TurnEvent>>) -> TurnOutcome {
        let Some(responder) = self.dispatch(&mut ctx).await else {
            return TurnOutcome::fixed(ctx.turn_id, DISPATCH_UNAVAILABLE, Intent::Other);
        };
        ctx.model = responder.name().to_string();

        // Gather context
        self.remember(&ctx.session_id, ChatMessage::user(ctx.user_input.clone())).await;
        ctx.intent = self.detect_intent(&ctx.user_input, &responder).await;
        tracing::info!(intent = ctx.intent.as_str(), model = %ctx.model, "turn routed");

        if let Some(text) = self.primitive(&ctx).await {
            self.finish(&ctx, &text).await;
            let mut outcome = TurnOutcome::fixed(ctx.turn_id, text, ctx.intent);
            outcome.model = Some(ctx.model);
            return outcome;
        }
        ctx.history = self.load_history(&ctx.session_id, &ctx.user_input, &responder).await;

        ctx.plan = self.plan(&ctx, &responder).await;
        if let Some(plan) = &ctx.plan {
            ctx.refined_plan = Some(self.refine_plan(&ctx, plan, &responder).await);
        }

        let full = match self.stream(&ctx, &responder, events).await {
            Ok(full) => full,
            Err(e) => {
                tracing::error!(model = %ctx.model, error = %e, "response stream failed");
                self.finish(&ctx, STREAM_FAILED).await;
                let mut outcome = TurnOutcome::fixed(ctx.turn_id, STREAM_FAILED, ctx.intent);
                outcome.model = Some(ctx.model);
                return outcome;
            }
        };

        let routed = routing::route(&full.text);
        let response = match routed.response.trim() {
            "" => STREAM_FAILED.to_string(),
            text => text.to_string(),
        };
        ctx.response = Some(response.clone());

        let actions = if full.interrupted.is_some() {
            if !routed.execute.is_empty() {
                tracing::warn!(commands = routed.execute.len(), "interrupted response, actions skipped");
            }
            Vec::new()
        } else {
            self.run_actions(&ctx, &routed.execute, &responder, events).await
        };

        self.finish(&ctx, &response).await;
        let thought_seed = self.plant_seed(&ctx, &response, routed.thought_seed.as_deref(), &responder).await;

        TurnOutcome {
            turn_id: ctx.turn_id,
            response,
            intent: ctx.intent,
            model: Some(ctx.model),
            routed: Some(routed),
            actions,
            interrupted: full.interrupted,
            thought_seed,
        }
    }

    /// Classify with lite (prime if lite is absent) and pick the responder.
    /// `None` ends the turn with an apology.
    async fn dispatch(&self, ctx: &mut TurnContext) -> Option<ModelLease> {
        let classifier_name = if self.pool.is_available(LITE) { LITE } else { PRIME };
        let classifier = self.pool.acquire(classifier_name).await?;

        let classification =
            match dispatch::classify(classifier.provider(), &ctx.user_input, &ctx.instructions).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(model = classifier.name(), error = %e, "dispatch failed");
                    return None;
                }
            };
        ctx.token_budget = classification.token_budget();
        tracing::info!(
            complexity = ?classification.complexity,
            context = ?classification.context,
            budget = ctx.token_budget,
            "dispatch classified"
        );

        if classifier.name() == LITE && classification.wants_prime() && self.pool.is_available(PRIME) {
            drop(classifier);
            if let Some(prime) = self.pool.acquire(PRIME).await {
                tracing::info!("escalated to prime");
                return Some(prime);
            }
            return self.pool.acquire(LITE).await;
        }
        Some(classifier)
    }

    /// `name` if it is the responder or free right now, else the responder.
    fn helper<'a>(&self, responder: &'a ModelLease, name: &str) -> Helper<'a> {
        if responder.name() == name {
            return Helper::Responder(responder);
        }
        match self.pool.try_acquire(name) {
            Some(lease) => Helper::Leased(lease),
            None => Helper::Responder(responder),
        }
    }

    /// An idle completion model other than the responder.
    fn idle_peer(&self, responder: &ModelLease) -> Option<ModelLease> {
        let name = self.pool.get_idle_model(&[responder.name(), EMBED])?;
        self.pool.try_acquire(&name)
    }

    async fn detect_intent(&self, input: &str, responder: &ModelLease) -> Intent {
        if let Some(intent) = intent::fast_intent_check(input) {
            return intent;
        }
        let helper = self.helper(responder, LITE);
        intent::detect_intent(input, Some(helper.lease().provider()), None).await
    }

    /// Intents answered without the model pipeline. `None` continues the turn.
    async fn primitive(&self, ctx: &TurnContext) -> Option<String> {
        match ctx.intent {
            Intent::Help => Some(HELP_TEXT.to_string()),
            Intent::Exit => Some(GOODBYE.to_string()),
            Intent::Shell => {
                let shell = self.executor.shell();
                if let Err(e) = shell.check(&ctx.user_input) {
                    tracing::debug!(error = %e, "shell intent is not a runnable command");
                    return None;
                }
                Some(match shell.run(&ctx.user_input).await {
                    Ok(output) => output.summary(),
                    Err(e) => e.to_string(),
                })
            }
            Intent::ReadFile => {
                let path = files::extract_path(&ctx.user_input)?;
                Some(match files::read_text(&path).await {
                    Ok(content) => content,
                    Err(e) => e.to_string(),
                })
            }
            _ => None,
        }
    }

    /// History for the prompt, without the message just appended for this turn.
    /// Past the threshold it collapses into one system summary.
    async fn load_history(&self, session_id: &str, input: &str, responder: &ModelLease) -> Vec<ChatMessage> {
        let mut history = match self.sessions.history(session_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "history unavailable, continuing without it");
                return Vec::new();
            }
        };
        let stored = history.len();
        if history.last().is_some_and(|m| m.role == Role::User && m.content == input) {
            history.pop();
        }
        if stored <= self.cfg.history_summary_threshold {
            return history;
        }

        let helper = self.helper(responder, PRIME);
        match summarizer::summarize_messages(helper.lease().provider(), &history, SUMMARY_MAX_TOKENS).await {
            Ok(summary) => {
                let summary = ChatMessage::system(format!("Summary of the conversation so far: {summary}"));
                let replaced = vec![summary.clone(), ChatMessage::user(input)];
                if let Err(e) = self.sessions.replace_history(session_id, replaced).await {
                    tracing::warn!(error = %e, "failed to store summarized history");
                }
                tracing::info!(messages = stored, model = helper.lease().name(), "history summarized");
                vec![summary]
            }
            Err(e) => {
                tracing::warn!(error = %e, "history summary failed, using full history");
                history
            }
        }
    }

    async fn plan(&self, ctx: &TurnContext, responder: &ModelLease) -> Option<String> {
        let request = CompletionRequest::new(
            prompt::plan_messages(&self.persona, ctx),
            self.cfg.plan_max_tokens,
            self.cfg.response_temperature,
        );
        match responder.provider().complete(request).await {
            Ok(reply) if !reply.content.trim().is_empty() => Some(reply.content.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(model = responder.name(), error = %e, "plan generation failed");
                None
            }
        }
    }

    async fn refine_plan(&self, ctx: &TurnContext, plan: &str, responder: &ModelLease) -> String {
        let peer = self.idle_peer(responder);
        let model = peer.as_ref().unwrap_or(responder);
        let reflector = Reflector::new(model.provider(), self.safety.as_ref(), &self.cfg);
        let refinement = reflector.reflect_and_refine(&ctx.user_input, plan, &self.persona, &ctx.instructions).await;
        tracing::info!(
            reflector = model.name(),
            iterations = refinement.iterations,
            confidence = refinement.confidence,
            stop = ?refinement.stop,
            "plan refined"
        );
        refinement.text
    }

    async fn stream(
        &self,
        ctx: &TurnContext,
        responder: &ModelLease,
        events: Option<&UnboundedSender<TurnEvent>>,
    ) -> Result<FullResponse, LlmError> {
        let judge = self.idle_peer(responder);
        let embedder = self.pool.try_acquire(EMBED);
        if let Some(judge) = &judge {
            judge.mark(ModelStatus::Observing);
        }
        responder.mark(ModelStatus::Responding);

        let observer = StreamObserver::new(judge.as_ref().map(ModelLease::provider), &self.cfg)
            .with_embedder(embedder.as_ref().map(ModelLease::provider));
        let context = ObserverContext { user_input: ctx.user_input.clone(), instructions: ctx.instructions.clone() };
        let voice = ExternalVoice::new(responder.provider(), &self.cfg).with_observer(observer, context);

        let result = voice
            .generate_full_response(prompt::response_messages(&self.persona, ctx), ctx.token_budget, |event| {
                let event = match event {
                    StreamEvent::Token(token) => TurnEvent::Token(token.clone()),
                    StreamEvent::Interruption(reason) => TurnEvent::Interruption(reason.clone()),
                };
                send(events, event);
            })
            .await;
        responder.mark(ModelStatus::Busy);
        result
    }

    async fn run_actions(
        &self,
        ctx: &TurnContext,
        commands: &[String],
        responder: &ModelLease,
        events: Option<&UnboundedSender<TurnEvent>>,
    ) -> Vec<ActionEvent> {
        if commands.is_empty() {
            return Vec::new();
        }
        let peer = self.idle_peer(responder);
        let model = peer.as_ref().unwrap_or(responder);
        let reflector = Reflector::new(model.provider(), self.safety.as_ref(), &self.cfg);
        let runner = ActionRunner::new(&self.executor, self.safety.as_ref(), Some(reflector), &self.persona);
        runner
            .run(&ctx.user_input, commands, |event| send(events, TurnEvent::Action(event.clone())))
            .await
    }

    async fn remember(&self, session_id: &str, message: ChatMessage) {
        if let Err(e) = self.sessions.add_message(session_id, message).await {
            tracing::warn!(error = %e, "failed to persist message");
        }
    }

    /// Persist the reply, log the exchange and mark activity.
    async fn finish(&self, ctx: &TurnContext, response: &str) {
        self.remember(&ctx.session_id, ChatMessage::assistant(response)).await;
        if let Err(e) = self.transcript.append(&ctx.user_input, response).await {
            tracing::warn!(path = %self.transcript.path().display(), error = %e, "transcript append failed");
        }
        self.clock.touch();
    }

    /// Best effort. The routed `THOUGHT_SEED:` wins over asking the model.
    async fn plant_seed(
        &self,
        ctx: &TurnContext,
        response: &str,
        routed: Option<&str>,
        responder: &ModelLease,
    ) -> Option<String> {
        let saved = match routed.filter(|s| !s.trim().is_empty()) {
            Some(seed) => {
                let context = SeedContext { user_input: ctx.user_input.clone(), gaia_response: response.to_string() };
                self.seeds.record(&ctx.user_input, seed, context).await
            }
            None => {
                let llm: &dyn LlmProvider = responder.provider();
                thought_seed::generate_thought_seed(llm, &self.seeds, &ctx.user_input, response).await
            }
        };
        match saved {
            Ok(seed) => Some(seed.seed),
            Err(e) => {
                tracing::warn!(error = %e, "thought seed skipped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySessionStore;
    use gaia_llm::provider::MockProvider;

    fn cfg(dir: &std::path::Path) -> Arc<GaiaCfg> {
        Arc::new(GaiaCfg {
            chat_log_path: dir.join("chat.log").display().to_string(),
            seeds_dir: dir.join("seeds").display().to_string(),
            ..GaiaCfg::default()
        })
    }

    #[tokio::test]
    async fn empty_pool_gives_apology() {
        let dir = tempfile::tempdir().unwrap();
        let agent = AgentCore::new(ModelPool::new(), Arc::new(InMemorySessionStore::new()), cfg(dir.path()));
        let outcome = agent.run_turn("s", "hello", None).await;
        assert_eq!(outcome.response, DISPATCH_UNAVAILABLE);
        assert!(outcome.model.is_none());
    }

    #[tokio::test]
    async fn classifier_error_is_a_hard_exit() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ModelPool::new();
        let lite = Arc::new(MockProvider::failing("offline"));
        let prime = Arc::new(MockProvider::new("RESPONSE: hi"));
        pool.register(LITE, lite.clone());
        pool.register(PRIME, prime.clone());
        let sessions = Arc::new(InMemorySessionStore::new());
        let agent = AgentCore::new(pool.clone(), sessions.clone(), cfg(dir.path()));

        let outcome = agent.run_turn("s", "hello", None).await;
        assert_eq!(outcome.response, DISPATCH_UNAVAILABLE);
        assert_eq!(lite.call_count(), 1);
        assert_eq!(prime.call_count(), 0);
        assert!(sessions.history("s").await.unwrap().is_empty());
        assert_eq!(pool.status(LITE), Some(ModelStatus::Idle));
    }

    #[tokio::test]
    async fn exit_answers_without_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ModelPool::new();
        let lite = Arc::new(MockProvider::new("{\"complexity\": \"simple\", \"required_context\": \"minimal\"}"));
        pool.register(LITE, lite.clone());
        let agent = AgentCore::new(pool, Arc::new(InMemorySessionStore::new()), cfg(dir.path()));

        let outcome = agent.run_turn("s", "  quit ", None).await;
        assert_eq!(outcome.intent, Intent::Exit);
        assert_eq!(outcome.response, GOODBYE);
        assert_eq!(lite.call_count(), 1);
    }

    #[tokio::test]
    async fn long_history_is_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ModelPool::new();
        let lite = Arc::new(MockProvider::scripted([
            "{\"complexity\": \"simple\"}",
            "other",
            "We talked about gardening.",
            "PLAN: answer",
            "RESPONSE: Sure.\nTHOUGHT_SEED: ask about tomatoes",
        ]));
        pool.register(LITE, lite.clone());
        let sessions = Arc::new(InMemorySessionStore::new());
        let old: Vec<ChatMessage> = (0..24).map(|i| ChatMessage::user(format!("message {i}"))).collect();
        sessions.replace_history("s", old).await.unwrap();
        let agent = AgentCore::new(pool, sessions.clone(), cfg(dir.path()));

        let outcome = agent.run_turn("s", "tell me more", None).await;
        assert_eq!(outcome.response, "Sure.");
        assert_eq!(outcome.thought_seed.as_deref(), Some("ask about tomatoes"));

        let history = sessions.history("s").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::System);
        assert!(history[0].content.contains("gardening"));
        assert_eq!(history[1], ChatMessage::user("tell me more"));
        assert_eq!(history[2], ChatMessage::assistant("Sure."));
    }
}
