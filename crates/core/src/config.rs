use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

/// All gaia pipeline parameters. Loaded from `gaia_config` table at startup.
/// First boot writes defaults; subsequent boots read existing values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaiaCfg {
    // stream observer
    pub observer_token_threshold: usize,
    pub logical_stop_punctuation: String,
    pub observer_summarize_chars: usize,
    pub observer_salient_sentences: usize,
    pub observer_max_tokens: u32,

    // self-reflection
    pub max_reflection_iterations: usize,
    pub reflection_threshold: f32,
    pub reflection_token_budget: usize,
    pub reflection_max_tokens: u32,
    pub reflection_temperature: f32,

    // generation
    pub plan_max_tokens: u32,
    pub response_temperature: f32,
    pub response_top_p: f32,

    // history
    pub history_summary_threshold: usize,

    // safe execution
    pub shell_timeout_secs: u64,
    pub safe_shell_commands: Vec<String>,

    // files
    pub chat_log_path: String,
    pub seeds_dir: String,

    // autonomous idle loop
    pub idle_threshold_secs: u64,
    pub idle_review_interval_secs: u64,
}

impl Default for GaiaCfg {
    fn default() -> Self {
        Self {
            observer_token_threshold: 20,
            logical_stop_punctuation: ".!?\n".into(),
            observer_summarize_chars: 600,
            observer_salient_sentences: 3,
            observer_max_tokens: 64,
            max_reflection_iterations: 3,
            reflection_threshold: 0.9,
            reflection_token_budget: 512,
            reflection_max_tokens: 256,
            reflection_temperature: 0.2,
            plan_max_tokens: 512,
            response_temperature: 0.7,
            response_top_p: 0.95,
            history_summary_threshold: 20,
            shell_timeout_secs: 10,
            safe_shell_commands: ["ls", "cat", "pwd", "echo", "head", "tail", "wc", "grep", "date", "whoami"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chat_log_path: "logs/chat_session.log".into(),
            seeds_dir: "knowledge/seeds".into(),
            idle_threshold_secs: 300,
            idle_review_interval_secs: 60,
        }
    }
}

impl GaiaCfg {
    /// Load config from `gaia_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM gaia_config")
                .fetch_all(pool)
                .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Write all default values into `gaia_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        for (key, value, desc) in &self.to_entries() {
            sqlx::query(
                "INSERT INTO gaia_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            observer_token_threshold: get_or(m, "observer_token_threshold", d.observer_token_threshold),
            logical_stop_punctuation: m
                .get("logical_stop_punctuation")
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or(d.logical_stop_punctuation),
            observer_summarize_chars: get_or(m, "observer_summarize_chars", d.observer_summarize_chars),
            observer_salient_sentences: get_or(m, "observer_salient_sentences", d.observer_salient_sentences),
            observer_max_tokens: get_or(m, "observer_max_tokens", d.observer_max_tokens),
            max_reflection_iterations: get_or(m, "max_reflection_iterations", d.max_reflection_iterations),
            reflection_threshold: get_or(m, "reflection_threshold", d.reflection_threshold),
            reflection_token_budget: get_or(m, "reflection_token_budget", d.reflection_token_budget),
            reflection_max_tokens: get_or(m, "reflection_max_tokens", d.reflection_max_tokens),
            reflection_temperature: get_or(m, "reflection_temperature", d.reflection_temperature),
            plan_max_tokens: get_or(m, "plan_max_tokens", d.plan_max_tokens),
            response_temperature: get_or(m, "response_temperature", d.response_temperature),
            response_top_p: get_or(m, "response_top_p", d.response_top_p),
            history_summary_threshold: get_or(m, "history_summary_threshold", d.history_summary_threshold),
            shell_timeout_secs: get_or(m, "shell_timeout_secs", d.shell_timeout_secs),
            safe_shell_commands: get_list_or(m, "safe_shell_commands", d.safe_shell_commands),
            chat_log_path: get_or(m, "chat_log_path", d.chat_log_path),
            seeds_dir: get_or(m, "seeds_dir", d.seeds_dir),
            idle_threshold_secs: get_or(m, "idle_threshold_secs", d.idle_threshold_secs),
            idle_review_interval_secs: get_or(m, "idle_review_interval_secs", d.idle_review_interval_secs),
        }
    }

    fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("observer_token_threshold", self.observer_token_threshold.to_string(), "Tokens between observer checks"),
            ("logical_stop_punctuation", self.logical_stop_punctuation.clone(), "Characters that trigger an observer check"),
            ("observer_summarize_chars", self.observer_summarize_chars.to_string(), "Buffer length above which the observer judges salient sentences only"),
            ("observer_salient_sentences", self.observer_salient_sentences.to_string(), "Sentences kept when reducing an observer buffer"),
            ("observer_max_tokens", self.observer_max_tokens.to_string(), "Max tokens for the observer judge reply"),
            ("max_reflection_iterations", self.max_reflection_iterations.to_string(), "Reflection loop bound"),
            ("reflection_threshold", self.reflection_threshold.to_string(), "Confidence that stops reflection early"),
            ("reflection_token_budget", self.reflection_token_budget.to_string(), "Draft size (tokens) above which the draft is summarized first"),
            ("reflection_max_tokens", self.reflection_max_tokens.to_string(), "Max tokens per reflection call"),
            ("reflection_temperature", self.reflection_temperature.to_string(), "Reflection sampling temperature"),
            ("plan_max_tokens", self.plan_max_tokens.to_string(), "Max tokens for the initial plan"),
            ("response_temperature", self.response_temperature.to_string(), "Response sampling temperature"),
            ("response_top_p", self.response_top_p.to_string(), "Response nucleus sampling"),
            ("history_summary_threshold", self.history_summary_threshold.to_string(), "History length that triggers summarization"),
            ("shell_timeout_secs", self.shell_timeout_secs.to_string(), "Shell command wall-clock timeout"),
            ("safe_shell_commands", self.safe_shell_commands.join(","), "Comma-separated allowed shell programs"),
            ("chat_log_path", self.chat_log_path.clone(), "Chat transcript file"),
            ("seeds_dir", self.seeds_dir.clone(), "Thought seed directory"),
            ("idle_threshold_secs", self.idle_threshold_secs.to_string(), "Inactivity before the idle loop reviews seeds"),
            ("idle_review_interval_secs", self.idle_review_interval_secs.to_string(), "Idle loop poll interval"),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_list_or(map: &HashMap<String, String>, key: &str, default: Vec<String>) -> Vec<String> {
    match map.get(key) {
        Some(v) if !v.trim().is_empty() => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_map_overrides_and_defaults() {
        let mut m = HashMap::new();
        m.insert("reflection_threshold".to_string(), "0.75".to_string());
        m.insert("observer_token_threshold".to_string(), "not-a-number".to_string());
        m.insert("safe_shell_commands".to_string(), "ls, git ,".to_string());
        let cfg = GaiaCfg::from_map(&m);
        assert_eq!(cfg.reflection_threshold, 0.75);
        assert_eq!(cfg.observer_token_threshold, 20);
        assert_eq!(cfg.safe_shell_commands, vec!["ls", "git"]);
        assert_eq!(cfg.logical_stop_punctuation, ".!?\n");
    }

    #[test]
    fn entries_round_trip_through_map() {
        let cfg = GaiaCfg::default();
        let map: HashMap<String, String> = cfg
            .to_entries()
            .into_iter()
            .map(|(k, v, _)| (k.to_string(), v))
            .collect();
        let back = GaiaCfg::from_map(&map);
        assert_eq!(back.safe_shell_commands, cfg.safe_shell_commands);
        assert_eq!(back.max_reflection_iterations, 3);
        assert_eq!(back.chat_log_path, cfg.chat_log_path);
    }
}
