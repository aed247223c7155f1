//! Usage telemetry recovery from the Copilot CLI process log.
//!
//! The CLI logs each `assistant_usage` telemetry event as pretty-printed JSON
//! after a `[Telemetry] cli.telemetry:` marker line, with every line carrying
//! a timestamp prefix and unrelated log lines interleaved around it:
//!
//! ```text
//! 2026-02-01T10:00:00.123Z [INFO] [Telemetry] cli.telemetry:
//! 2026-02-01T10:00:00.123Z {
//!   "kind": "assistant_usage",
//!   "session_id": "abc",
//!   "properties": { "model": "claude-sonnet-4.5", ... },
//!   "metrics": { "input_tokens": 1000, ... }
//! }
//! ```
//!
//! Blocks are recovered by a three-state scanner (marker, block start,
//! brace-balanced accumulation); [`step`] is its transition function.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;

pub const TELEMETRY_MARKER: &str = "[Telemetry] cli.telemetry:";
const USAGE_KIND: &str = "assistant_usage";
const UNKNOWN: &str = "unknown";

/// ISO-8601 timestamp prefix with trailing `Z`, e.g. `2026-02-01T10:00:00.123Z `.
static TIMESTAMP_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T[\d:.]+Z\s*").unwrap());

/// One model invocation recovered from a telemetry block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmCall {
    pub model: String,
    pub initiator: String,
    pub api_call_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    /// Cost as reported by the CLI.
    pub cost: f64,
    pub duration_ms: u64,
    /// Timestamp prefix of the marker line, when it had one.
    pub timestamp: Option<String>,
}

/// Scanner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    SeekingMarker,
    SeekingBlock,
    /// Inside a block; `depth` is the running `{` minus `}` count.
    Accumulating { depth: i64 },
}

/// What the scanner does with the line that produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    /// Not part of any block.
    Skip,
    /// Marker line: start a fresh candidate.
    Mark,
    /// Add the stripped line to the candidate.
    Append,
    /// Add the stripped line and emit the candidate.
    Complete,
}

/// Transition function of the block scanner.
///
/// In `SeekingBlock`, a line that does not open a block abandons the marker
/// and is re-read as if seeking a marker, so back-to-back markers work.
pub fn step(state: ScanState, line: &str) -> (ScanState, LineAction) {
    match state {
        ScanState::SeekingMarker => {
            if line.contains(TELEMETRY_MARKER) {
                (ScanState::SeekingBlock, LineAction::Mark)
            } else {
                (ScanState::SeekingMarker, LineAction::Skip)
            }
        }
        ScanState::SeekingBlock => {
            let stripped = strip_timestamp(line);
            if stripped.trim_start().starts_with('{') {
                accumulate(0, stripped)
            } else {
                step(ScanState::SeekingMarker, line)
            }
        }
        ScanState::Accumulating { depth } => accumulate(depth, strip_timestamp(line)),
    }
}

fn accumulate(depth: i64, stripped: &str) -> (ScanState, LineAction) {
    let depth = depth + brace_balance(stripped);
    if depth <= 0 {
        (ScanState::SeekingMarker, LineAction::Complete)
    } else {
        (ScanState::Accumulating { depth }, LineAction::Append)
    }
}

fn brace_balance(s: &str) -> i64 {
    s.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

fn strip_timestamp(line: &str) -> &str {
    match TIMESTAMP_PREFIX.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

fn leading_timestamp(line: &str) -> Option<String> {
    TIMESTAMP_PREFIX
        .find(line)
        .map(|m| m.as_str().trim_end().to_string())
}

/// A brace-balanced candidate block, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    pub timestamp: Option<String>,
}

/// Line-at-a-time driver around [`step`].
#[derive(Debug)]
pub struct BlockScanner {
    state: ScanState,
    buffer: Vec<String>,
    marker_timestamp: Option<String>,
}

impl Default for BlockScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::SeekingMarker,
            buffer: Vec::new(),
            marker_timestamp: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Feed one line; returns a candidate when a block closes on it.
    pub fn feed(&mut self, line: &str) -> Option<Candidate> {
        let (next, action) = step(self.state, line);
        self.state = next;
        match action {
            LineAction::Skip => None,
            LineAction::Mark => {
                self.buffer.clear();
                self.marker_timestamp = leading_timestamp(line);
                None
            }
            LineAction::Append => {
                self.buffer.push(strip_timestamp(line).to_string());
                None
            }
            LineAction::Complete => {
                self.buffer.push(strip_timestamp(line).to_string());
                Some(Candidate {
                    text: std::mem::take(&mut self.buffer).join("\n"),
                    timestamp: self.marker_timestamp.take(),
                })
            }
        }
    }

    /// End of input. A block still open here is handed over as-is; it never
    /// balanced, so decoding normally rejects it.
    pub fn finish(self) -> Option<Candidate> {
        match self.state {
            ScanState::Accumulating { depth } => {
                tracing::debug!(depth, lines = self.buffer.len(), "unterminated telemetry block");
                Some(Candidate {
                    text: self.buffer.join("\n"),
                    timestamp: self.marker_timestamp,
                })
            }
            _ => None,
        }
    }
}

/// Extract usage records from process-log text.
///
/// With a non-empty `session_id`, blocks from other sessions are dropped.
pub fn extract_llm_calls(text: &str, session_id: Option<&str>) -> Vec<LlmCall> {
    let session_id = session_id.filter(|s| !s.is_empty());
    let mut scanner = BlockScanner::new();
    let mut candidates = Vec::new();

    for line in text.split('\n') {
        if let Some(c) = scanner.feed(line) {
            candidates.push(c);
        }
    }
    candidates.extend(scanner.finish());

    let total = candidates.len();
    let calls: Vec<LlmCall> = candidates
        .into_iter()
        .filter_map(|c| parse_candidate(&c, session_id))
        .collect();

    tracing::debug!(candidates = total, calls = calls.len(), "telemetry scan complete");
    calls
}

/// Read a process log and extract its usage records.
///
/// An unreadable log is treated as empty. Invalid UTF-8 is replaced.
pub fn read_process_log(path: &Path, session_id: Option<&str>) -> Vec<LlmCall> {
    match std::fs::read(path) {
        Ok(bytes) => extract_llm_calls(&String::from_utf8_lossy(&bytes), session_id),
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "failed to read process log"
            );
            Vec::new()
        }
    }
}

fn parse_candidate(candidate: &Candidate, session_id: Option<&str>) -> Option<LlmCall> {
    let block: Value = match serde_json::from_str(&candidate.text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "discarding unparsable telemetry block");
            return None;
        }
    };

    if block.get("kind").and_then(|k| k.as_str()) != Some(USAGE_KIND) {
        return None;
    }

    if let Some(wanted) = session_id {
        let block_session = block.get("session_id").and_then(|s| s.as_str()).unwrap_or("");
        if block_session != wanted {
            return None;
        }
    }

    let empty = Value::Null;
    let props = block.get("properties").unwrap_or(&empty);
    let metrics = block.get("metrics").unwrap_or(&empty);

    Some(LlmCall {
        model: text_or_unknown(props, "model"),
        initiator: text_or_unknown(props, "initiator"),
        api_call_id: text_or_unknown(props, "api_call_id"),
        input_tokens: count(metrics, "input_tokens"),
        output_tokens: count(metrics, "output_tokens"),
        cache_read_tokens: count(metrics, "cache_read_tokens"),
        cache_write_tokens: count(metrics, "cache_write_tokens"),
        cost: metrics.get("cost").and_then(|c| c.as_f64()).unwrap_or(0.0),
        duration_ms: count(metrics, "duration"),
        timestamp: candidate.timestamp.clone(),
    })
}

fn text_or_unknown(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|s| s.as_str())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Non-negative integer metric; floats are truncated, anything else is 0.
fn count(v: &Value, key: &str) -> u64 {
    v.get(key)
        .and_then(|n| {
            n.as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2026-02-01T10:00:00.123Z";

    fn block(session: &str, model: &str, input: u64, cache_read: u64, output: u64) -> String {
        format!(
            "{TS} [INFO] [Telemetry] cli.telemetry:\n\
             {TS} {{\n\
             \x20 \"kind\": \"assistant_usage\",\n\
             \x20 \"session_id\": \"{session}\",\n\
             \x20 \"properties\": {{\n\
             \x20   \"model\": \"{model}\",\n\
             \x20   \"initiator\": \"agent\",\n\
             \x20   \"api_call_id\": \"call-{input}\"\n\
             \x20 }},\n\
             \x20 \"metrics\": {{\n\
             \x20   \"input_tokens\": {input},\n\
             \x20   \"output_tokens\": {output},\n\
             \x20   \"cache_read_tokens\": {cache_read},\n\
             \x20   \"cache_write_tokens\": 0,\n\
             \x20   \"cost\": 1,\n\
             \x20   \"duration\": 2500\n\
             \x20 }}\n\
             }}\n"
        )
    }

    #[test]
    fn transition_table() {
        use LineAction::*;
        use ScanState::*;

        assert_eq!(step(SeekingMarker, "noise"), (SeekingMarker, Skip));
        assert_eq!(
            step(SeekingMarker, "x [Telemetry] cli.telemetry:"),
            (SeekingBlock, Mark)
        );
        assert_eq!(
            step(SeekingBlock, &format!("{TS} {{")),
            (Accumulating { depth: 1 }, Append)
        );
        assert_eq!(step(SeekingBlock, "   {\"a\": 1}"), (SeekingMarker, Complete));
        assert_eq!(step(SeekingBlock, "unrelated"), (SeekingMarker, Skip));
        assert_eq!(
            step(SeekingBlock, "[Telemetry] cli.telemetry:"),
            (SeekingBlock, Mark)
        );
        assert_eq!(
            step(Accumulating { depth: 1 }, "  \"p\": {"),
            (Accumulating { depth: 2 }, Append)
        );
        assert_eq!(
            step(Accumulating { depth: 2 }, "  }"),
            (Accumulating { depth: 1 }, Append)
        );
        assert_eq!(step(Accumulating { depth: 1 }, "}"), (SeekingMarker, Complete));
        assert_eq!(
            step(Accumulating { depth: 1 }, "noise without braces"),
            (Accumulating { depth: 1 }, Append)
        );
    }

    #[test]
    fn extracts_single_block() {
        let text = format!(
            "{TS} [INFO] starting\n{}{TS} [INFO] done\n",
            block("s1", "claude-sonnet-4.5", 1000, 200, 100)
        );
        let calls = extract_llm_calls(&text, Some("s1"));
        assert_eq!(calls.len(), 1);
        let c = &calls[0];
        assert_eq!(c.model, "claude-sonnet-4.5");
        assert_eq!(c.initiator, "agent");
        assert_eq!(c.api_call_id, "call-1000");
        assert_eq!(c.input_tokens, 1000);
        assert_eq!(c.cache_read_tokens, 200);
        assert_eq!(c.output_tokens, 100);
        assert_eq!(c.cost, 1.0);
        assert_eq!(c.duration_ms, 2500);
        assert_eq!(c.timestamp.as_deref(), Some(TS));
    }

    #[test]
    fn n_blocks_yield_n_calls_in_order() {
        let text: String = (1..=4)
            .map(|i| format!("{TS} noise {i}\n{}", block("s1", "gpt-5.2", i * 10, 0, i)))
            .collect();
        let calls = extract_llm_calls(&text, Some("s1"));
        let inputs: Vec<u64> = calls.iter().map(|c| c.input_tokens).collect();
        assert_eq!(inputs, vec![10, 20, 30, 40]);
    }

    #[test]
    fn filters_other_sessions() {
        let text = format!(
            "{}{}",
            block("mine", "gpt-5.2", 1, 0, 1),
            block("theirs", "gpt-5.2", 2, 0, 1)
        );
        assert_eq!(extract_llm_calls(&text, Some("mine")).len(), 1);
        assert_eq!(extract_llm_calls(&text, None).len(), 2);
        assert_eq!(extract_llm_calls(&text, Some("")).len(), 2);
    }

    #[test]
    fn wrong_kind_is_discarded() {
        let text = format!(
            "[Telemetry] cli.telemetry:\n{{\n  \"kind\": \"tool_usage\",\n  \"metrics\": {{}}\n}}\n{}",
            block("s", "gpt-5.2", 7, 0, 1)
        );
        let calls = extract_llm_calls(&text, None);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input_tokens, 7);
    }

    #[test]
    fn unbalanced_block_yields_nothing() {
        let text = "[Telemetry] cli.telemetry:\n{\n  \"kind\": \"assistant_usage\",\n  \"metrics\": {\n";
        assert!(extract_llm_calls(text, None).is_empty());
    }

    #[test]
    fn finish_hands_over_unterminated_block() {
        let mut scanner = BlockScanner::new();
        scanner.feed(&format!("{TS} [INFO] {TELEMETRY_MARKER}"));
        scanner.feed(&format!("{TS} {{"));
        scanner.feed("  \"kind\": \"assistant_usage\",");
        let c = scanner.finish().unwrap();
        assert_eq!(c.text, "{\n  \"kind\": \"assistant_usage\",");
        assert_eq!(c.timestamp.as_deref(), Some(TS));
        assert!(parse_candidate(&c, None).is_none());
    }

    #[test]
    fn finish_without_open_block_is_empty() {
        assert!(BlockScanner::new().finish().is_none());

        let mut marked = BlockScanner::new();
        marked.feed(TELEMETRY_MARKER);
        assert!(marked.finish().is_none());

        let mut closed = BlockScanner::new();
        closed.feed(TELEMETRY_MARKER);
        assert!(closed.feed("{}").is_some());
        assert!(closed.finish().is_none());
    }

    #[test]
    fn malformed_json_is_discarded_and_scan_resumes() {
        let text = format!(
            "[Telemetry] cli.telemetry:\n{{ \"kind\": assistant_usage }}\n{}",
            block("s", "gpt-5.2", 3, 0, 1)
        );
        let calls = extract_llm_calls(&text, None);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input_tokens, 3);
    }

    #[test]
    fn marker_followed_by_non_block_is_abandoned() {
        let text = "[Telemetry] cli.telemetry:\n\
                    2026-02-01T10:00:00.5Z [WARN] something else\n\
                    {\"kind\": \"assistant_usage\", \"metrics\": {\"input_tokens\": 9}}\n";
        assert!(extract_llm_calls(text, None).is_empty());
    }

    #[test]
    fn missing_fields_default() {
        let text = "[Telemetry] cli.telemetry:\n{\"kind\": \"assistant_usage\"}\n";
        let calls = extract_llm_calls(text, None);
        assert_eq!(calls.len(), 1);
        let c = &calls[0];
        assert_eq!(c.model, "unknown");
        assert_eq!(c.initiator, "unknown");
        assert_eq!(c.api_call_id, "unknown");
        assert_eq!(c.input_tokens, 0);
        assert_eq!(c.cost, 0.0);
        assert_eq!(c.duration_ms, 0);
        assert_eq!(c.timestamp, None);
    }

    #[test]
    fn float_metrics_are_truncated() {
        let text = "[Telemetry] cli.telemetry:\n{\"kind\": \"assistant_usage\", \"metrics\": {\"duration\": 1234.9, \"cost\": 0.25, \"input_tokens\": -5}}\n";
        let c = &extract_llm_calls(text, None)[0];
        assert_eq!(c.duration_ms, 1234);
        assert_eq!(c.cost, 0.25);
        assert_eq!(c.input_tokens, 0);
    }

    #[test]
    fn crlf_lines_are_handled() {
        let text = block("s", "gpt-5.2", 5, 0, 1).replace('\n', "\r\n");
        let calls = extract_llm_calls(&text, Some("s"));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input_tokens, 5);
    }

    #[test]
    fn scanner_reports_state() {
        let mut scanner = BlockScanner::new();
        assert_eq!(scanner.state(), ScanState::SeekingMarker);
        assert!(scanner.feed(TELEMETRY_MARKER).is_none());
        assert_eq!(scanner.state(), ScanState::SeekingBlock);
        assert!(scanner.feed("{").is_none());
        assert_eq!(scanner.state(), ScanState::Accumulating { depth: 1 });
        let c = scanner.feed("}").unwrap();
        assert_eq!(c.text, "{\n}");
        assert_eq!(scanner.state(), ScanState::SeekingMarker);
    }

    #[test]
    fn read_missing_log_is_empty() {
        let calls = read_process_log(Path::new("/nonexistent/process-1.log"), None);
        assert!(calls.is_empty());
    }

    #[test]
    fn read_log_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process-1.log");
        std::fs::write(&path, block("s1", "claude-opus-4.6", 50, 0, 5)).unwrap();
        let calls = read_process_log(&path, Some("s1"));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "claude-opus-4.6");
    }
}
