use super::{ActionError, MAX_OUTPUT};
use chrono::Local;
use std::path::{Path, PathBuf};

/// Extract a file path from free text.
/// Priority: quoted string > token containing `/` or `.ext`
pub fn extract_path(input: &str) -> Option<String> {
    for delim in ['"', '\''] {
        let mut chars = input.chars();
        while let Some(c) = chars.next() {
            if c == delim {
                let s: String = chars.by_ref().take_while(|&ch| ch != delim).collect();
                if !s.is_empty() && (s.contains('/') || s.contains('.')) {
                    return Some(s);
                }
            }
        }
    }
    input
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ';' | '(' | ')' | '?' | '!')))
        .find(|t| t.contains('/') || (t.contains('.') && !t.ends_with('.') && !t.starts_with('.')))
        .map(str::to_string)
}

/// Read a text file, truncated to the output limit.
pub async fn read_text(path: &str) -> Result<String, ActionError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ActionError::Io { path: path.to_string(), source })?;
    Ok(truncate(content))
}

/// Write `content` to `path`. An existing file is first moved to
/// `<path>.bak.<YYYYmmdd_HHMMSS>`; the backup path is returned.
pub async fn write_with_backup(path: &str, content: &str) -> Result<Option<PathBuf>, ActionError> {
    let target = Path::new(path);
    let io_err = |source| ActionError::Io { path: path.to_string(), source };

    let backup = if tokio::fs::try_exists(target).await.map_err(io_err)? {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let backup = PathBuf::from(format!("{path}.bak.{stamp}"));
        tokio::fs::rename(target, &backup).await.map_err(io_err)?;
        tracing::info!(path, backup = %backup.display(), "backup created");
        Some(backup)
    } else {
        None
    };

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(target, content).await.map_err(io_err)?;
    tracing::info!(path, bytes = content.len(), "file written");
    Ok(backup)
}

pub(crate) fn truncate(mut text: String) -> String {
    if text.len() <= MAX_OUTPUT {
        return text;
    }
    let total = text.len();
    let mut cut = MAX_OUTPUT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(&format!("... [truncated, {total} bytes total]"));
    text
}
