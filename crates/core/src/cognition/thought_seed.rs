//! Thought seeds: one-sentence follow-up ideas saved for later review.
//!
//! Seeds are JSON files under the seed directory. Review records a decision
//! but never acts on a seed.

use chrono::{DateTime, Utc};
use gaia_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SEED_MAX_TOKENS: u32 = 96;
const REVIEW_MAX_TOKENS: u32 = 128;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("seed io: {0}")]
    Io(#[from] std::io::Error),
    #[error("seed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("seed model: {0}")]
    Llm(#[from] LlmError),
    #[error("model returned an empty seed")]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedContext {
    #[serde(default)]
    pub user_input: String,
    #[serde(default)]
    pub gaia_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtSeed {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub prompt: String,
    #[serde(default)]
    pub context: SeedContext,
    pub seed: String,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_decision: Option<String>,
    #[serde(default)]
    pub should_act: Option<bool>,
}

/// Directory-backed seed storage.
#[derive(Debug, Clone)]
pub struct SeedStore {
    dir: PathBuf,
}

impl SeedStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a new unreviewed seed as `seed_<timestamp>_<id>.json`.
    pub async fn record(&self, prompt: &str, seed: &str, context: SeedContext) -> Result<ThoughtSeed, SeedError> {
        let seed = ThoughtSeed {
            id: Uuid::new_v4(),
            created: Utc::now(),
            prompt: prompt.to_string(),
            context,
            seed: seed.trim().to_string(),
            reviewed: false,
            reviewed_at: None,
            review_decision: None,
            should_act: None,
        };
        let name = format!("seed_{}_{}.json", seed.created.format("%Y%m%d_%H%M%S"), seed.id.simple());
        let path = self.dir.join(name);
        self.write(&path, &seed).await?;
        tracing::info!(path = %path.display(), "thought seed saved");
        Ok(seed)
    }

    async fn write(&self, path: &Path, seed: &ThoughtSeed) -> Result<(), SeedError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(path, serde_json::to_vec_pretty(seed)?).await?;
        Ok(())
    }

    /// Unreviewed seeds, oldest first. Unreadable files are logged and skipped.
    pub async fn list_unreviewed(&self) -> Result<Vec<(PathBuf, ThoughtSeed)>, SeedError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut seeds = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_seed = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("seed_") && n.ends_with(".json"));
            if !is_seed {
                continue;
            }
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(SeedError::from)
                .and_then(|bytes| serde_json::from_slice::<ThoughtSeed>(&bytes).map_err(SeedError::from));
            match parsed {
                Ok(seed) if !seed.reviewed => seeds.push((path, seed)),
                Ok(_) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable thought seed skipped"),
            }
        }
        seeds.sort_by_key(|(_, s)| s.created);
        Ok(seeds)
    }

    /// Record a review decision on the seed stored at `path`.
    pub async fn mark_reviewed(&self, path: &Path, seed: &mut ThoughtSeed, decision: &str) -> Result<(), SeedError> {
        seed.reviewed = true;
        seed.reviewed_at = Some(Utc::now());
        seed.review_decision = Some(decision.trim().to_string());
        seed.should_act = Some(decision.to_lowercase().split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == "yes"));
        self.write(path, seed).await
    }
}

/// Ask the model for a one-sentence follow-up idea about this exchange and save it.
pub async fn generate_thought_seed(
    llm: &dyn LlmProvider,
    store: &SeedStore,
    user_input: &str,
    response: &str,
) -> Result<ThoughtSeed, SeedError> {
    let prompt = format!(
        "Review the following exchange:\n\nUser: {user_input}\nGAIA: {response}\n\n\
         Based on this exchange, write one concise sentence describing a possible next step, \
         a question to investigate, or an insight to remember. Do not act on it."
    );
    let request = CompletionRequest::new(
        vec![ChatMessage::system("Generate only a thought seed. Do not act or execute."), ChatMessage::user(prompt)],
        SEED_MAX_TOKENS,
        0.7,
    );
    let reply = llm.complete(request).await?;
    let text = reply.content.trim();
    if text.is_empty() {
        return Err(SeedError::Empty);
    }
    let context = SeedContext { user_input: user_input.to_string(), gaia_response: response.to_string() };
    store.record(user_input, text, context).await
}

/// Review every unreviewed seed once. Returns how many were reviewed.
pub async fn review_seeds(llm: &dyn LlmProvider, store: &SeedStore) -> Result<usize, SeedError> {
    let mut reviewed = 0;
    for (path, mut seed) in store.list_unreviewed().await? {
        let prompt = format!(
            "Here is a thought seed generated earlier:\nSeed: {}\nContext: user said \"{}\"\n\
             Should GAIA act on this seed now? Answer yes or no, and explain.",
            seed.seed, seed.context.user_input
        );
        let request = CompletionRequest::new(
            vec![
                ChatMessage::system("Consider the thought seed. Answer yes or no, with a reason."),
                ChatMessage::user(prompt),
            ],
            REVIEW_MAX_TOKENS,
            0.2,
        );
        let decision = match llm.complete(request).await {
            Ok(r) => r.content,
            Err(e) => {
                tracing::warn!(seed = %seed.id, error = %e, "seed review failed");
                continue;
            }
        };
        store.mark_reviewed(&path, &mut seed, &decision).await?;
        tracing::info!(seed = %seed.id, should_act = ?seed.should_act, "thought seed reviewed");
        reviewed += 1;
    }
    Ok(reviewed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaia_llm::provider::MockProvider;

    #[tokio::test]
    async fn missing_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeedStore::new(dir.path().join("nope"));
        assert!(store.list_unreviewed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn generate_saves_seed_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeedStore::new(dir.path());
        let llm = MockProvider::new("  Look into nightly backups.  ");
        let seed = generate_thought_seed(&llm, &store, "back up my notes", "Done.").await.unwrap();
        assert_eq!(seed.seed, "Look into nightly backups.");
        assert_eq!(seed.context.gaia_response, "Done.");

        let listed = store.list_unreviewed().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1, seed);
    }

    #[tokio::test]
    async fn empty_seed_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeedStore::new(dir.path());
        let llm = MockProvider::new("   ");
        assert!(matches!(generate_thought_seed(&llm, &store, "a", "b").await, Err(SeedError::Empty)));
        assert!(store.list_unreviewed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn review_records_decision_without_acting() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeedStore::new(dir.path());
        store.record("p", "check disk usage", SeedContext::default()).await.unwrap();
        store.record("p", "learn rust", SeedContext::default()).await.unwrap();

        let llm = MockProvider::scripted(["Yes, it is cheap.", "No. Later."]);
        assert_eq!(review_seeds(&llm, &store).await.unwrap(), 2);
        assert!(store.list_unreviewed().await.unwrap().is_empty());

        let mut decisions = Vec::new();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let seed: ThoughtSeed = serde_json::from_slice(&std::fs::read(entry.unwrap().path()).unwrap()).unwrap();
            assert!(seed.reviewed);
            decisions.push(seed.should_act.unwrap());
        }
        decisions.sort();
        assert_eq!(decisions, vec![false, true]);
    }

    #[tokio::test]
    async fn garbage_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seed_bad.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("other.txt"), "x").unwrap();
        let store = SeedStore::new(dir.path());
        store.record("p", "ok", SeedContext::default()).await.unwrap();
        assert_eq!(store.list_unreviewed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_review_leaves_seed_unreviewed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeedStore::new(dir.path());
        store.record("p", "s", SeedContext::default()).await.unwrap();
        let llm = MockProvider::failing("down");
        assert_eq!(review_seeds(&llm, &store).await.unwrap(), 0);
        assert_eq!(store.list_unreviewed().await.unwrap().len(), 1);
    }
}
