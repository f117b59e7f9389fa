pub mod actions;
pub mod files;
pub mod safe_exec;
pub mod shell;

use crate::cognition::thought_seed::SeedError;
use std::time::Duration;

pub use safe_exec::{AiCall, ExecutionError, SafeExecutor};
pub use shell::{SafeShell, ShellOutput};

/// Byte cap on captured command and file output.
pub const MAX_OUTPUT: usize = 64 * 1024;

/// Failure of a side-effecting primitive after the call itself was accepted.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unsafe shell command: {0}")]
    UnsafeShellCommand(String),
    #[error("command timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("failed to execute command: {0}")]
    Spawn(std::io::Error),
    #[error("{0}")]
    Exited(String),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Seed(#[from] SeedError),
}

/// Either the call was rejected before any side effect, or the primitive failed.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(#[from] ExecutionError),
    #[error(transparent)]
    Failed(#[from] ActionError),
}
