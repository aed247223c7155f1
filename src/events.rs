//! `events.jsonl` parsing: rebuild turns, tool calls, subagents, compactions
//! and dev-loop actions from the Copilot CLI event stream.
use crate::devloop::{DevLoopAction, PendingAction};
use crate::toolchains;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

const USER_PREVIEW_CHARS: usize = 200;
const ERROR_MESSAGE_CHARS: usize = 300;

/// Session metadata from `session.start` (plus fields filled in later).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub copilot_version: String,
    pub start_time: Option<String>,
    pub cwd: String,
    pub git_root: String,
    pub branch: String,
    pub repository: String,
    pub summary: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserMessage {
    pub content_preview: String,
    pub timestamp: String,
    pub full_length: usize,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub turn_id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub tool_calls: Vec<String>,
    pub message_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStart {
    pub name: String,
    pub timestamp: String,
    pub tool_call_id: String,
}

/// A tool completion joined with its start record.
///
/// `name` and `start_time` are empty when no start was seen for the id.
#[derive(Debug, Clone)]
pub struct ToolCompletion {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone)]
pub struct Subagent {
    pub tool_call_id: String,
    pub name: String,
    pub display_name: String,
    pub start_time: String,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Compaction {
    pub start_time: String,
    pub end_time: Option<String>,
    pub pre_tokens: Option<u64>,
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeChange {
    pub timestamp: String,
    pub data: Value,
}

/// Everything recovered from one event log, in chronological order.
#[derive(Debug, Default)]
pub struct ParsedEvents {
    pub session: SessionInfo,
    /// Whether a `session.start` event was seen at all.
    pub session_started: bool,
    pub user_messages: Vec<UserMessage>,
    pub turns: Vec<Turn>,
    pub tool_starts: Vec<ToolStart>,
    pub tool_completes: Vec<ToolCompletion>,
    pub subagents: Vec<Subagent>,
    pub compactions: Vec<Compaction>,
    pub errors: Vec<ErrorRecord>,
    pub mode_changes: Vec<ModeChange>,
    pub plan_changes: u64,
    pub task_completes: u64,
    pub dev_loop: Vec<DevLoopAction>,
    /// Non-blank lines that were not valid JSON.
    pub malformed_lines: u64,
}

/// Start info kept per tool call id for the lifetime of a parse.
#[derive(Debug, Clone)]
struct StartRecord {
    name: String,
    timestamp: String,
    pending: Option<PendingAction>,
}

/// Mutable state threaded through one parse: the open turn and every tool
/// start seen so far (never pruned, so a reused id finds the stale start).
#[derive(Debug, Default)]
struct ParseContext {
    current_turn: Option<Turn>,
    starts: HashMap<String, StartRecord>,
}

/// Parse event-log lines.
///
/// Blank lines and lines that are not JSON are skipped; unknown event types
/// are ignored.
pub fn parse_events<I, S>(lines: I) -> ParsedEvents
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ctx = ParseContext::default();
    let mut out = ParsedEvents::default();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        let v: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed event line");
                out.malformed_lines += 1;
                continue;
            }
        };
        handle_event(&mut ctx, &mut out, &v);
    }

    if let Some(turn) = ctx.current_turn {
        tracing::debug!(
            turn_id = %turn.turn_id,
            started = %turn.start_time,
            "dropping unterminated turn"
        );
    }

    out
}

fn handle_event(ctx: &mut ParseContext, out: &mut ParsedEvents, v: &Value) {
    let empty = Value::Null;
    let data = v.get("data").unwrap_or(&empty);
    let ts = str_field(v, "timestamp");

    match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "session.start" => session_start(out, data, &ts),
        "user.message" => {
            let content = str_field(data, "content");
            out.user_messages.push(UserMessage {
                content_preview: preview(&content, USER_PREVIEW_CHARS),
                timestamp: ts,
                full_length: content.chars().count(),
            });
        }
        "assistant.turn_start" => {
            if let Some(prev) = ctx.current_turn.take() {
                tracing::debug!(
                    turn_id = %prev.turn_id,
                    started = %prev.start_time,
                    "turn replaced before turn_end"
                );
            }
            ctx.current_turn = Some(Turn {
                turn_id: str_field(data, "turnId"),
                start_time: ts,
                end_time: None,
                tool_calls: Vec::new(),
                message_count: 0,
            });
        }
        "assistant.turn_end" => {
            if let Some(mut turn) = ctx.current_turn.take() {
                turn.end_time = Some(ts);
                out.turns.push(turn);
            }
        }
        "assistant.message" => {
            if let Some(turn) = ctx.current_turn.as_mut() {
                turn.message_count += 1;
                if let Some(requests) = data.get("toolRequests").and_then(|r| r.as_array()) {
                    turn.tool_calls
                        .extend(requests.iter().map(|r| str_field(r, "name")));
                }
            }
        }
        "tool.execution_start" => tool_start(ctx, out, data, ts),
        "tool.execution_complete" => tool_complete(ctx, out, data, ts),
        "subagent.started" => out.subagents.push(Subagent {
            tool_call_id: str_field(data, "toolCallId"),
            name: str_field(data, "agentName"),
            display_name: str_field(data, "agentDisplayName"),
            start_time: ts,
            end_time: None,
        }),
        "subagent.completed" => {
            let id = str_field(data, "toolCallId");
            if let Some(sa) = out
                .subagents
                .iter_mut()
                .find(|sa| sa.tool_call_id == id && sa.end_time.is_none())
            {
                sa.end_time = Some(ts);
            }
        }
        "session.compaction_start" => out.compactions.push(Compaction {
            start_time: ts,
            ..Default::default()
        }),
        "session.compaction_complete" => {
            if let Some(last) = out.compactions.last_mut() {
                if last.end_time.is_none() {
                    last.end_time = Some(ts);
                    last.pre_tokens = data.get("preCompactionTokens").and_then(|t| t.as_u64());
                    last.success = Some(data.get("success").and_then(|s| s.as_bool()).unwrap_or(false));
                }
            }
        }
        "session.error" => out.errors.push(ErrorRecord {
            kind: str_field(data, "errorType"),
            message: preview(&str_field(data, "message"), ERROR_MESSAGE_CHARS),
            timestamp: ts,
        }),
        "session.mode_changed" => {
            tracing::debug!(timestamp = %ts, "mode changed");
            out.mode_changes.push(ModeChange {
                timestamp: ts,
                data: data.clone(),
            });
        }
        "session.plan_changed" => out.plan_changes += 1,
        "session.task_complete" => out.task_completes += 1,
        _ => {}
    }
}

fn session_start(out: &mut ParsedEvents, data: &Value, ts: &str) {
    let empty = Value::Null;
    let ctx = data.get("context").unwrap_or(&empty);
    let start_time = data
        .get("startTime")
        .and_then(|s| s.as_str())
        .unwrap_or(ts)
        .to_string();

    out.session = SessionInfo {
        id: str_field(data, "sessionId"),
        copilot_version: str_field(data, "copilotVersion"),
        start_time: Some(start_time),
        cwd: str_field(ctx, "cwd"),
        git_root: str_field(ctx, "gitRoot"),
        branch: str_field(ctx, "branch"),
        repository: str_field(ctx, "repository"),
        summary: None,
        end_time: None,
    };
    out.session_started = true;
}

fn tool_start(ctx: &mut ParseContext, out: &mut ParsedEvents, data: &Value, ts: String) {
    let name = str_field(data, "toolName");
    let tool_call_id = str_field(data, "toolCallId");

    let pending = if name == "bash" {
        let empty = Value::Null;
        let args = data.get("arguments").unwrap_or(&empty);
        let command = str_field(args, "command");
        toolchains::classify(&command).map(|kind| {
            PendingAction::new(kind, &command, &str_field(args, "description"), &ts)
        })
    } else {
        None
    };

    ctx.starts.insert(
        tool_call_id.clone(),
        StartRecord {
            name: name.clone(),
            timestamp: ts.clone(),
            pending,
        },
    );
    out.tool_starts.push(ToolStart {
        name,
        timestamp: ts,
        tool_call_id,
    });
}

fn tool_complete(ctx: &mut ParseContext, out: &mut ParsedEvents, data: &Value, ts: String) {
    let tool_call_id = str_field(data, "toolCallId");
    let success = data.get("success").and_then(|s| s.as_bool()).unwrap_or(false);
    let start = ctx.starts.get(&tool_call_id);

    if start.is_none() {
        tracing::debug!(tool_call_id = %tool_call_id, "completion without matching start");
    }

    if let Some(pending) = start.and_then(|s| s.pending.clone()) {
        let result = result_text(data);
        out.dev_loop.push(pending.complete(success, &result, &ts));
    }

    out.tool_completes.push(ToolCompletion {
        tool_call_id,
        name: start.map(|s| s.name.clone()).unwrap_or_default(),
        success,
        start_time: start.map(|s| s.timestamp.clone()).unwrap_or_default(),
        end_time: ts,
    });
}

/// `data.result.content` as text; non-string content is rendered as JSON.
fn result_text(data: &Value) -> String {
    match data.get("result").and_then(|r| r.get("content")) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// String field of a JSON object, empty when absent or not a string.
fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .to_string()
}

/// First `max_chars` characters of `s`.
pub fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
