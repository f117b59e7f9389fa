//! Per-session conversation history.
//!
//! History is append-only until summarization replaces it wholesale.
//! Both stores serialize mutation of a session's history.

use gaia_llm::provider::{ChatMessage, Role};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session store: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Ordered history for `session_id`, oldest first. Unknown sessions are empty.
    async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>, SessionError>;

    async fn add_message(&self, session_id: &str, message: ChatMessage) -> Result<(), SessionError>;

    /// Replace the whole history (used after summarization).
    async fn replace_history(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<(), SessionError>;
}

/// Process-local store. One coarse lock over every session.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>, SessionError> {
        Ok(self.sessions.lock().await.get(session_id).cloned().unwrap_or_default())
    }

    async fn add_message(&self, session_id: &str, message: ChatMessage) -> Result<(), SessionError> {
        self.sessions.lock().await.entry(session_id.to_owned()).or_default().push(message);
        Ok(())
    }

    async fn replace_history(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<(), SessionError> {
        self.sessions.lock().await.insert(session_id.to_owned(), messages);
        Ok(())
    }
}

/// Postgres-backed store over the `session_messages` table.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    role: String,
    content: String,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        ChatMessage::new(Role::parse(&row.role), row.content)
    }
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>, SessionError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT role, content FROM session_messages WHERE session_id = $1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn add_message(&self, session_id: &str, message: ChatMessage) -> Result<(), SessionError> {
        sqlx::query("INSERT INTO session_messages (session_id, role, content) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_history(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM session_messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        for message in &messages {
            sqlx::query("INSERT INTO session_messages (session_id, role, content) VALUES ($1, $2, $3)")
                .bind(session_id)
                .bind(message.role.as_str())
                .bind(&message.content)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_session_is_empty() {
        let store = InMemorySessionStore::new();
        assert!(store.history("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_keeps_insertion_order_per_session() {
        let store = InMemorySessionStore::new();
        store.add_message("a", ChatMessage::user("one")).await.unwrap();
        store.add_message("b", ChatMessage::user("other")).await.unwrap();
        store.add_message("a", ChatMessage::assistant("two")).await.unwrap();

        let h = store.history("a").await.unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].content, "one");
        assert_eq!(h[1].role, Role::Assistant);
        assert_eq!(store.history("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_history_swaps_everything() {
        let store = InMemorySessionStore::new();
        for i in 0..5 {
            store.add_message("s", ChatMessage::user(format!("m{i}"))).await.unwrap();
        }
        store.replace_history("s", vec![ChatMessage::system("summary")]).await.unwrap();
        let h = store.history("s").await.unwrap();
        assert_eq!(h, vec![ChatMessage::system("summary")]);
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let store = std::sync::Arc::new(InMemorySessionStore::new());
        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.add_message("s", ChatMessage::user(format!("m{i}"))).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(store.history("s").await.unwrap().len(), 20);
    }
}
