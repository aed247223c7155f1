use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Event log inside a session directory.
pub const EVENTS_FILE: &str = "events.jsonl";
/// Workspace metadata inside a session directory.
pub const WORKSPACE_FILE: &str = "workspace.yaml";

/// Locates session state and process logs under the Copilot CLI home
/// (default `~/.copilot/`).
///
/// Layout:
/// - `session-state/<session-id>/events.jsonl`
/// - `session-state/<session-id>/workspace.yaml`
/// - `logs/process-*.log`
#[derive(Debug, Clone)]
pub struct CopilotDir {
    root: PathBuf,
}

impl CopilotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$HOME/.copilot`, or `.copilot` relative to the working directory when
    /// `HOME` is unset.
    pub fn default_root() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(".copilot")
    }

    /// Directory holding one subdirectory per session.
    pub fn session_state_dir(&self) -> PathBuf {
        self.root.join("session-state")
    }

    /// Directory holding the CLI process logs.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Resolve a session id, id prefix, or directory path.
    ///
    /// Tried in order: `query` as a directory containing `events.jsonl`;
    /// `session-state/<query>`; the first session directory (by name) that
    /// starts with `query` and has an event log.
    pub fn find_session_dir(&self, query: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(query);
        if has_events(&direct) {
            return Some(direct);
        }

        let state_dir = self.session_state_dir();
        let candidate = state_dir.join(query);
        if has_events(&candidate) {
            return Some(candidate);
        }

        let entries = match std::fs::read_dir(&state_dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    dir = %state_dir.display(),
                    "cannot list session-state directory"
                );
                return None;
            }
        };

        let mut matches: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(query))
            .map(|entry| entry.path())
            .filter(|path| has_events(path))
            .collect();
        matches.sort();
        matches.into_iter().next()
    }

    /// Like [`find_session_dir`](Self::find_session_dir), but a miss is an error.
    pub fn resolve_session(&self, query: &str) -> Result<PathBuf, DiscoveryError> {
        self.find_session_dir(query)
            .ok_or_else(|| DiscoveryError::SessionNotFound {
                query: query.to_string(),
                searched: self.session_state_dir(),
            })
    }

    /// Find the process log that mentions `session_id` near its top.
    ///
    /// Logs matching `logs/process-*.log` are checked newest first; the first
    /// whose lines `0..=scan_lines` contain the id wins.
    pub fn find_process_log(&self, session_id: &str, scan_lines: usize) -> Option<PathBuf> {
        let logs_dir = self.logs_dir();
        if !logs_dir.is_dir() {
            return None;
        }

        let pattern = format!(
            "{}/process-*.log",
            glob::Pattern::escape(&logs_dir.to_string_lossy())
        );

        let paths = match glob::glob(&pattern) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, pattern = %pattern, "invalid process log pattern");
                return None;
            }
        };

        let mut logs: Vec<(std::time::SystemTime, PathBuf)> = paths
            .flatten()
            .filter_map(|path| {
                let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((mtime, path))
            })
            .collect();
        logs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (_, path) in logs {
            match head_mentions(&path, session_id, scan_lines) {
                Ok(true) => {
                    tracing::debug!(log = %path.display(), "matched process log");
                    return Some(path);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(error = %e, log = %path.display(), "skipping unreadable log");
                }
            }
        }
        None
    }
}

fn has_events(dir: &Path) -> bool {
    dir.is_dir() && dir.join(EVENTS_FILE).exists()
}

/// Whether any of the first `scan_lines + 1` lines contains `needle`.
fn head_mentions(path: &Path, needle: &str, scan_lines: usize) -> std::io::Result<bool> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut buf = Vec::new();

    for _ in 0..=scan_lines {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if String::from_utf8_lossy(&buf).contains(needle) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// An explicitly requested process log, if it exists.
pub fn explicit_log(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        tracing::warn!(path = %path.display(), "process log not found");
        None
    }
}

/// Value of the first `summary:` line in the session's `workspace.yaml`.
///
/// Missing or unreadable files yield `None`.
pub fn read_workspace_summary(session_dir: &Path) -> Option<String> {
    let path = session_dir.join(WORKSPACE_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            if path.exists() {
                tracing::warn!(error = %e, path = %path.display(), "failed to read workspace file");
            }
            return None;
        }
    };

    contents
        .lines()
        .find(|line| line.starts_with("summary:"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
}

/// Errors that stop the run: without an event log there is nothing to report.
#[derive(Debug)]
pub enum DiscoveryError {
    /// No session directory matched the query.
    SessionNotFound { query: String, searched: PathBuf },
    /// The events file exists but could not be read.
    ReadEvents {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::SessionNotFound { query, searched } => write!(
                f,
                "could not find session directory for '{query}' (looked in {})",
                searched.display()
            ),
            DiscoveryError::ReadEvents { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::SessionNotFound { .. } => None,
            DiscoveryError::ReadEvents { source, .. } => Some(source),
        }
    }
}
