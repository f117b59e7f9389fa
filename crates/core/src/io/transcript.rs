use chrono::{DateTime, Local, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only chat log, one block per turn.
#[derive(Debug)]
pub struct ChatTranscript {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ChatTranscript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `[timestamp]\nUser > ...\nGAIA > ...\n\n`.
    pub async fn append(&self, user_input: &str, response: &str) -> std::io::Result<()> {
        let block = format!("[{}]\nUser > {user_input}\nGAIA > {response}\n\n", Local::now().to_rfc3339());
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(block.as_bytes()).await?;
        file.flush().await
    }
}

/// Last-activity timestamp shared between turns and the idle loop.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    last_millis: Arc<AtomicI64>,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    pub fn new() -> Self {
        Self { last_millis: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())) }
    }

    pub fn touch(&self) {
        self.last_millis.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        let millis = self.last_millis.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }

    pub fn idle_for(&self) -> Duration {
        let elapsed = Utc::now().timestamp_millis() - self.last_millis.load(Ordering::Relaxed);
        Duration::from_millis(elapsed.max(0) as u64)
    }

    #[cfg(test)]
    pub(crate) fn set_idle_for(&self, d: Duration) {
        self.last_millis.store(Utc::now().timestamp_millis() - d.as_millis() as i64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_blocks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let t = ChatTranscript::new(dir.path().join("logs/chat.log"));
        t.append("hi", "hello").await.unwrap();
        t.append("bye", "see you").await.unwrap();
        let log = std::fs::read_to_string(t.path()).unwrap();
        let first = log.find("User > hi\nGAIA > hello\n\n").unwrap();
        let second = log.find("User > bye\nGAIA > see you\n\n").unwrap();
        assert!(first < second);
        assert!(log.starts_with('['));
    }

    #[test]
    fn clock_tracks_idle_time() {
        let clock = ActivityClock::new();
        clock.set_idle_for(Duration::from_secs(120));
        assert!(clock.idle_for() >= Duration::from_secs(119));
        let shared = clock.clone();
        shared.touch();
        assert!(clock.idle_for() < Duration::from_secs(5));
        assert!(clock.last_activity() <= Utc::now());
    }
}
