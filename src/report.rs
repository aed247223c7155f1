//! Final metrics document: session metadata, LLM usage, turn and tool
//! statistics, dev-loop signals, and the flat `summary` block.

use crate::devloop::{self, DevLoopAction, DevLoopSummary};
use crate::events::{
    Compaction, ErrorRecord, ModeChange, ParsedEvents, SessionInfo, ToolStart, UserMessage,
};
use crate::pricing::{compute_cost, round_to};
use crate::telemetry::LlmCall;
use crate::timestamp;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// The JSON document printed for one session.
#[derive(Debug, Serialize)]
pub struct Report {
    pub session: SessionInfo,
    pub llm_calls: Vec<PricedCall>,
    pub turns: TurnCounts,
    pub user_messages: Vec<UserMessage>,
    pub tool_calls: ToolCallStats,
    pub subagents: Vec<SubagentRun>,
    pub compactions: Vec<Compaction>,
    pub errors: Vec<ErrorRecord>,
    pub mode_changes: Vec<ModeChange>,
    pub dev_loop: Vec<DevLoopAction>,
    pub dev_loop_summary: DevLoopSummary,
    pub plan_changes: u64,
    pub task_completes: u64,
    pub summary: Summary,
    #[serde(rename = "_meta")]
    pub meta: Meta,
}

/// A telemetry call plus its estimated cost under the local price table.
#[derive(Debug, Serialize)]
pub struct PricedCall {
    #[serde(flatten)]
    pub call: LlmCall,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TurnCounts {
    pub total: usize,
    pub user_initiated: usize,
    /// Turns minus user messages; negative when users sent more messages
    /// than turns were recorded.
    pub agent_initiated: i64,
}

#[derive(Debug, Serialize)]
pub struct ToolCallStats {
    pub total: usize,
    /// Completions reported as unsuccessful.
    pub failed: usize,
    pub by_name: BTreeMap<String, u64>,
    pub long_running: Vec<ToolDuration>,
    /// Starts whose tool call id never completed.
    pub unfinished: Vec<ToolStart>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDuration {
    pub name: String,
    pub duration_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct SubagentRun {
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LongestCall {
    pub duration_ms: u64,
    pub model: String,
    pub initiator: String,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub total_llm_calls: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_cache_write_tokens: u64,
    pub cache_hit_rate_pct: f64,
    pub total_llm_duration_ms: u64,
    pub avg_llm_duration_ms: u64,
    pub longest_call: Option<LongestCall>,
    pub models_used: BTreeMap<String, u64>,
    pub estimated_cost_usd: f64,
    pub session_duration_ms: Option<i64>,
    pub total_turns: usize,
    pub user_turns: usize,
    pub agent_turns: i64,
    pub total_tool_calls: usize,
    pub total_subagents: usize,
    pub total_compactions: usize,
    pub total_errors: usize,
    pub total_mode_changes: usize,
    pub total_builds: usize,
    pub total_tests: usize,
    pub build_failures: usize,
    pub test_failures: usize,
    pub fix_cycles: usize,
}

/// Where the inputs came from.
#[derive(Debug, Default, Serialize)]
pub struct Meta {
    pub session_dir: String,
    pub process_log: Option<String>,
    /// Raw line count of `events.jsonl`, blank and malformed lines included.
    pub events_count: usize,
    pub llm_calls_found: usize,
}

/// Token and cost totals over a set of calls.
#[derive(Debug, Default, PartialEq)]
struct UsageTotals {
    input: u64,
    output: u64,
    cache_read: u64,
    cache_write: u64,
    duration_ms: u64,
    cost: f64,
}

impl UsageTotals {
    fn from_calls(calls: &[LlmCall]) -> Self {
        let mut totals = calls.iter().fold(UsageTotals::default(), |mut t, c| {
            t.input = t.input.saturating_add(c.input_tokens);
            t.output = t.output.saturating_add(c.output_tokens);
            t.cache_read = t.cache_read.saturating_add(c.cache_read_tokens);
            t.cache_write = t.cache_write.saturating_add(c.cache_write_tokens);
            t.duration_ms = t.duration_ms.saturating_add(c.duration_ms);
            t.cost += compute_cost(c.input_tokens, c.output_tokens, c.cache_read_tokens, &c.model);
            t
        });
        totals.cost = round_to(totals.cost, 4);
        totals
    }

    /// Share of input tokens served from cache, in percent (1 decimal).
    fn cache_hit_rate_pct(&self) -> f64 {
        if self.input == 0 {
            return 0.0;
        }
        round_to(self.cache_read as f64 / self.input as f64 * 100.0, 1)
    }
}

/// Mean call duration, rounded half-to-even; 0 with no calls.
fn average_duration(total_ms: u64, calls: usize) -> u64 {
    if calls == 0 {
        return 0;
    }
    (total_ms as f64 / calls as f64).round_ties_even() as u64
}

/// The slowest call; ties go to the earliest.
fn longest_call(calls: &[LlmCall]) -> Option<LongestCall> {
    calls
        .iter()
        .reduce(|best, c| if c.duration_ms > best.duration_ms { c } else { best })
        .map(|c| LongestCall {
            duration_ms: c.duration_ms,
            model: c.model.clone(),
            initiator: c.initiator.clone(),
        })
}

/// Last turn end, else last user message timestamp.
fn session_end(events: &ParsedEvents) -> Option<String> {
    events
        .turns
        .last()
        .and_then(|t| t.end_time.clone())
        .filter(|ts| !ts.is_empty())
        .or_else(|| events.user_messages.last().map(|m| m.timestamp.clone()))
        .filter(|ts| !ts.is_empty())
}

/// Assemble the report from parsed events and recovered telemetry.
///
/// Tool completions lasting longer than `long_running_tool_ms` are listed
/// individually.
pub fn build_report(
    events: ParsedEvents,
    llm_calls: Vec<LlmCall>,
    long_running_tool_ms: i64,
    meta: Meta,
) -> Report {
    let end_time = session_end(&events);
    let mut session = events.session;
    session.end_time = end_time;
    let session_duration_ms =
        timestamp::duration_ms(session.start_time.as_deref(), session.end_time.as_deref());

    let usage = UsageTotals::from_calls(&llm_calls);
    let mut models_used: BTreeMap<String, u64> = BTreeMap::new();
    for c in &llm_calls {
        *models_used.entry(c.model.clone()).or_default() += 1;
    }

    let turns = TurnCounts {
        total: events.turns.len(),
        user_initiated: events.user_messages.len(),
        agent_initiated: events.turns.len() as i64 - events.user_messages.len() as i64,
    };

    let mut by_name: BTreeMap<String, u64> = BTreeMap::new();
    let mut long_running = Vec::new();
    for tc in &events.tool_completes {
        *by_name.entry(tc.name.clone()).or_default() += 1;
        let duration =
            timestamp::duration_ms(Some(tc.start_time.as_str()), Some(tc.end_time.as_str()));
        if let Some(ms) = duration.filter(|ms| *ms > long_running_tool_ms) {
            long_running.push(ToolDuration {
                name: tc.name.clone(),
                duration_ms: ms,
            });
        }
    }

    let subagents: Vec<SubagentRun> = events
        .subagents
        .iter()
        .map(|sa| SubagentRun {
            name: sa.name.clone(),
            display_name: sa.display_name.clone(),
            duration_ms: timestamp::duration_ms(
                Some(sa.start_time.as_str()),
                sa.end_time.as_deref(),
            ),
        })
        .collect();

    let completed: HashSet<&str> = events
        .tool_completes
        .iter()
        .map(|tc| tc.tool_call_id.as_str())
        .collect();
    let unfinished: Vec<ToolStart> = events
        .tool_starts
        .iter()
        .filter(|ts| !completed.contains(ts.tool_call_id.as_str()))
        .cloned()
        .collect();
    let failed_tools = events.tool_completes.iter().filter(|tc| !tc.success).count();

    let dev_loop_summary = devloop::analyze(&events.dev_loop, &events.tool_completes);

    tracing::info!(
        llm_calls = llm_calls.len(),
        turns = turns.total,
        tool_calls = events.tool_completes.len(),
        dev_loop_actions = events.dev_loop.len(),
        "aggregated session metrics"
    );

    let summary = Summary {
        total_llm_calls: llm_calls.len(),
        total_input_tokens: usage.input,
        total_output_tokens: usage.output,
        total_cache_read_tokens: usage.cache_read,
        total_cache_write_tokens: usage.cache_write,
        cache_hit_rate_pct: usage.cache_hit_rate_pct(),
        total_llm_duration_ms: usage.duration_ms,
        avg_llm_duration_ms: average_duration(usage.duration_ms, llm_calls.len()),
        longest_call: longest_call(&llm_calls),
        models_used,
        estimated_cost_usd: usage.cost,
        session_duration_ms,
        total_turns: turns.total,
        user_turns: turns.user_initiated,
        agent_turns: turns.agent_initiated,
        total_tool_calls: events.tool_completes.len(),
        total_subagents: events.subagents.len(),
        total_compactions: events.compactions.len(),
        total_errors: events.errors.len(),
        total_mode_changes: events.mode_changes.len(),
        total_builds: dev_loop_summary.total_builds,
        total_tests: dev_loop_summary.total_tests,
        build_failures: dev_loop_summary.build_failures,
        test_failures: dev_loop_summary.test_failures,
        fix_cycles: dev_loop_summary.fix_cycles.len(),
    };

    let llm_calls = llm_calls
        .into_iter()
        .map(|call| PricedCall {
            estimated_cost_usd: compute_cost(
                call.input_tokens,
                call.output_tokens,
                call.cache_read_tokens,
                &call.model,
            ),
            call,
        })
        .collect();

    Report {
        session,
        llm_calls,
        turns,
        user_messages: events.user_messages,
        tool_calls: ToolCallStats {
            total: events.tool_completes.len(),
            failed: failed_tools,
            by_name,
            long_running,
            unfinished,
        },
        subagents,
        compactions: events.compactions,
        errors: events.errors,
        mode_changes: events.mode_changes,
        dev_loop: events.dev_loop,
        dev_loop_summary,
        plan_changes: events.plan_changes,
        task_completes: events.task_completes,
        summary,
        meta,
    }
}
