pub mod session;
pub mod summarizer;

pub use session::{InMemorySessionStore, PgSessionStore, SessionError, SessionStore};
