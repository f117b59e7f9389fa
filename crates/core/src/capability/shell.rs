use super::ActionError;
use super::files::truncate;
use crate::config::GaiaCfg;
use std::time::Duration;

/// Characters that would let a whitelisted program chain into another one.
const CONTROL_OPERATORS: &[&str] = &[";", "&", "|", "`", "$(", ">", "<", "\n"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short text for events and replies.
    pub fn summary(&self) -> String {
        let stdout = self.stdout.trim_end();
        if self.success() {
            return stdout.to_string();
        }
        let preview = self
            .stderr
            .lines()
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| stdout.lines().next().map(str::trim).filter(|s| !s.is_empty()))
            .unwrap_or("no output");
        format!("command exited with code {}: {preview}", self.exit_code)
    }
}

/// Runs whitelisted programs under `sh -c` with a hard wall-clock timeout.
#[derive(Debug, Clone)]
pub struct SafeShell {
    allowed: Vec<String>,
    timeout: Duration,
}

impl SafeShell {
    pub fn new(allowed: Vec<String>, timeout: Duration) -> Self {
        Self { allowed, timeout }
    }

    pub fn from_cfg(cfg: &GaiaCfg) -> Self {
        Self::new(cfg.safe_shell_commands.clone(), Duration::from_secs(cfg.shell_timeout_secs))
    }

    /// Reject anything whose program is not whitelisted or that chains commands.
    pub fn check(&self, command: &str) -> Result<(), ActionError> {
        let command = command.trim();
        let program = command.split_whitespace().next().unwrap_or_default();
        if program.is_empty() || !self.allowed.iter().any(|a| a == program) {
            return Err(ActionError::UnsafeShellCommand(command.to_string()));
        }
        if CONTROL_OPERATORS.iter().any(|op| command.contains(op)) {
            return Err(ActionError::UnsafeShellCommand(command.to_string()));
        }
        Ok(())
    }

    pub async fn run(&self, command: &str) -> Result<ShellOutput, ActionError> {
        if let Err(e) = self.check(command) {
            tracing::warn!(command, "unsafe shell command blocked");
            return Err(e);
        }

        let result = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let out = ShellOutput {
                    command: command.to_string(),
                    stdout: truncate(String::from_utf8_lossy(&output.stdout).into_owned()),
                    stderr: truncate(String::from_utf8_lossy(&output.stderr).into_owned()),
                    exit_code: output.status.code().unwrap_or(-1),
                };
                tracing::info!(command, exit_code = out.exit_code, "shell command finished");
                Ok(out)
            }
            Ok(Err(e)) => Err(ActionError::Spawn(e)),
            Err(_) => {
                tracing::warn!(command, timeout_secs = self.timeout.as_secs_f32(), "shell command timed out");
                Err(ActionError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn shell(allowed: &[&str], timeout_ms: u64) -> SafeShell {
        SafeShell::new(allowed.iter().map(|s| s.to_string()).collect(), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn whitelisted_command_runs() {
        let out = shell(&["echo"], 5000).run("echo hello").await.unwrap();
        assert!(out.success());
        assert_eq!(out.summary(), "hello");
    }

    #[tokio::test]
    async fn non_whitelisted_program_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("keep.txt");
        std::fs::write(&victim, "x").unwrap();
        let cmd = format!("rm -rf {}", victim.display());
        let err = shell(&["ls"], 5000).run(&cmd).await.unwrap_err();
        assert!(matches!(err, ActionError::UnsafeShellCommand(_)));
        assert!(err.to_string().starts_with("unsafe shell command"));
        assert!(victim.exists());
    }

    #[test]
    fn chaining_is_rejected() {
        let sh = shell(&["ls", "echo"], 1000);
        for cmd in ["ls; rm -rf /", "ls && rm x", "echo $(whoami)", "echo hi > f", "ls | sh"] {
            assert!(sh.check(cmd).is_err(), "{cmd}");
        }
        assert!(sh.check("ls -la /tmp").is_ok());
        assert!(sh.check("lsblk").is_err());
        assert!(sh.check("   ").is_err());
    }

    #[tokio::test]
    async fn timeout_is_bounded_and_distinct() {
        let start = Instant::now();
        let err = shell(&["sleep"], 200).run("sleep 5").await.unwrap_err();
        assert!(matches!(err, ActionError::Timeout(_)));
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let out = shell(&["ls"], 5000).run("ls /definitely/not/here").await.unwrap();
        assert!(!out.success());
        assert!(out.summary().starts_with("command exited with code"));
    }
}
