//! Dev-loop analysis: build/test actions and the signals derived from them.
//!
//! Actions are seeded when a `bash` tool starts with a build or test
//! command and finalized when the matching completion arrives. Once the
//! whole event log is parsed, [`analyze`] walks the finished actions to find
//! fix cycles, redundant builds and unvalidated edits.

use crate::events::{preview, ToolCompletion};
use crate::pricing::round_to;
use crate::timestamp;
use crate::toolchains::ActionKind;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Characters of the command kept on an action.
const COMMAND_PREVIEW_CHARS: usize = 200;
/// Characters of the tool result kept on an action.
const RESULT_PREVIEW_CHARS: usize = 200;
/// Prefix compared when deciding whether two builds ran the same thing.
const REDUNDANT_KEY_CHARS: usize = 80;
/// Characters of the first failing command kept on a fix cycle.
const FIX_CYCLE_PREVIEW_CHARS: usize = 100;

/// Phrases (lowercase) that mark a build or test result as failed.
const FAILURE_PHRASES: &[&str] = &[
    "build failed",
    "error(s)",
    "compilation error",
    "failed!",
    "error cs",
    "error ts",
    "error:",
    "exited with exit code 1",
    "exited with exit code 2",
];

/// Phrases (lowercase) that mark a test run as failed when no summary line
/// is present.
const TEST_FAILURE_PHRASES: &[&str] = &["test run failed", "tests failed"];

/// MSBuild-style error count, e.g. `0 Error(s)`.
static ERROR_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+Error\(s\)").unwrap());

/// `dotnet test` summary, e.g. `Passed!  - Failed: 0, Passed: 12`.
static TEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Passed!\s*-\s*Failed:\s*(\d+),\s*Passed:\s*(\d+)").unwrap()
});

/// A build/test command that has started but not completed yet.
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub command: String,
    pub description: String,
    pub start_time: String,
}

impl PendingAction {
    pub fn new(kind: ActionKind, command: &str, description: &str, start_time: &str) -> Self {
        Self {
            kind,
            command: preview(command, COMMAND_PREVIEW_CHARS),
            description: description.to_string(),
            start_time: start_time.to_string(),
        }
    }

    /// Finalize against the tool completion.
    ///
    /// The reported `success` flag is the starting point; the result text
    /// can only turn it into a failure. Test failures in the output fail
    /// builds too (`make check`), but pass/fail counts are only recorded on
    /// test actions.
    pub fn complete(self, success: bool, result: &str, end_time: &str) -> DevLoopAction {
        let build_failed = detect_build_failure(result);

        let summary = parse_test_summary(result);
        let test_failed = match summary {
            Some((failed, _)) => failed > 0,
            None => {
                let lower = result.to_lowercase();
                TEST_FAILURE_PHRASES.iter().any(|p| lower.contains(p))
            }
        };
        let test_counts = summary.filter(|_| self.kind == ActionKind::Test);

        let duration_ms = timestamp::duration_ms(Some(&self.start_time), Some(end_time));

        DevLoopAction {
            kind: self.kind,
            command: self.command,
            description: self.description,
            start_time: self.start_time,
            end_time: end_time.to_string(),
            duration_ms,
            success: success && !build_failed && !test_failed,
            result_preview: preview(result, RESULT_PREVIEW_CHARS),
            test_failed: test_counts.map(|(failed, _)| failed),
            test_passed: test_counts.map(|(_, passed)| passed),
        }
    }
}

/// Failure verdict from the result text.
///
/// An explicit `N Error(s)` count overrides the phrase scan, so MSBuild's
/// `0 Error(s)` summary reads as success even though it contains "error(s)".
fn detect_build_failure(result: &str) -> bool {
    if let Some(caps) = ERROR_COUNT.captures(result) {
        // A count too large for u64 is still non-zero.
        return caps[1].parse::<u64>().map(|n| n > 0).unwrap_or(true);
    }
    let lower = result.to_lowercase();
    FAILURE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Returns `(failed, passed)` from a test summary line.
fn parse_test_summary(result: &str) -> Option<(u64, u64)> {
    let caps = TEST_SUMMARY.captures(result)?;
    let failed = caps[1].parse().ok()?;
    let passed = caps[2].parse().ok()?;
    Some((failed, passed))
}

/// A completed build or test command.
#[derive(Debug, Clone, Serialize)]
pub struct DevLoopAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub command: String,
    pub description: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub result_preview: String,
    pub test_failed: Option<u64>,
    pub test_passed: Option<u64>,
}

/// Two or more consecutive failing builds, optionally followed by a success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixCycle {
    pub failures: usize,
    pub first_failure: String,
    pub resolution: Option<String>,
    pub command_preview: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestResults {
    pub total_passed: u64,
    pub total_failed: u64,
}

/// Aggregated dev-loop signals for one session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DevLoopSummary {
    pub total_builds: usize,
    pub total_tests: usize,
    pub build_failures: usize,
    pub test_failures: usize,
    pub build_success_rate_pct: Option<f64>,
    pub test_success_rate_pct: Option<f64>,
    pub fix_cycles: Vec<FixCycle>,
    pub redundant_builds: usize,
    pub total_build_time_ms: i64,
    pub total_test_time_ms: i64,
    pub edits_without_validation: usize,
    pub test_results: TestResults,
}

/// Derive the dev-loop summary from finished actions and the full tool
/// completion timeline (used for edit/create timestamps).
pub fn analyze(actions: &[DevLoopAction], completions: &[ToolCompletion]) -> DevLoopSummary {
    let builds: Vec<&DevLoopAction> = actions
        .iter()
        .filter(|a| a.kind == ActionKind::Build)
        .collect();
    let tests: Vec<&DevLoopAction> = actions
        .iter()
        .filter(|a| a.kind == ActionKind::Test)
        .collect();

    let build_failures = builds.iter().filter(|b| !b.success).count();
    let test_failures = tests.iter().filter(|t| !t.success).count();

    let edit_times: Vec<&str> = completions
        .iter()
        .filter(|c| is_edit_tool(&c.name))
        .map(|c| c.end_time.as_str())
        .collect();

    let edit_count = edit_times.len();
    let validations = builds.len() + tests.len();

    DevLoopSummary {
        total_builds: builds.len(),
        total_tests: tests.len(),
        build_failures,
        test_failures,
        build_success_rate_pct: success_rate(builds.len(), build_failures),
        test_success_rate_pct: success_rate(tests.len(), test_failures),
        fix_cycles: find_fix_cycles(&builds),
        redundant_builds: count_redundant_builds(&builds, &edit_times),
        total_build_time_ms: builds.iter().filter_map(|b| b.duration_ms).sum(),
        total_test_time_ms: tests.iter().filter_map(|t| t.duration_ms).sum(),
        edits_without_validation: edit_count.saturating_sub(validations),
        test_results: TestResults {
            total_passed: tests
                .iter()
                .filter_map(|t| t.test_passed)
                .fold(0u64, u64::saturating_add),
            total_failed: tests
                .iter()
                .filter_map(|t| t.test_failed)
                .fold(0u64, u64::saturating_add),
        },
    }
}

fn is_edit_tool(name: &str) -> bool {
    matches!(name, "edit" | "create")
}

fn success_rate(total: usize, failures: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let pct = (total - failures) as f64 / total as f64 * 100.0;
    Some(round_to(pct, 1))
}

fn find_fix_cycles(builds: &[&DevLoopAction]) -> Vec<FixCycle> {
    let mut cycles = Vec::new();
    let mut run: Vec<&DevLoopAction> = Vec::new();

    for build in builds {
        if !build.success {
            run.push(build);
            continue;
        }
        if run.len() >= 2 {
            cycles.push(fix_cycle(&run, Some(build.start_time.clone())));
        }
        run.clear();
    }

    if run.len() >= 2 {
        cycles.push(fix_cycle(&run, None));
    }

    cycles
}

fn fix_cycle(run: &[&DevLoopAction], resolution: Option<String>) -> FixCycle {
    let first = run[0];
    FixCycle {
        failures: run.len(),
        first_failure: first.start_time.clone(),
        resolution,
        command_preview: preview(&first.command, FIX_CYCLE_PREVIEW_CHARS),
    }
}

/// A successful build is redundant when the build right before it (whatever
/// its outcome) ran the same command and no file was edited in between.
fn count_redundant_builds(builds: &[&DevLoopAction], edit_times: &[&str]) -> usize {
    builds
        .windows(2)
        .filter(|pair| {
            let (prev, curr) = (pair[0], pair[1]);
            if !curr.success {
                return false;
            }
            if preview(&prev.command, REDUNDANT_KEY_CHARS)
                != preview(&curr.command, REDUNDANT_KEY_CHARS)
            {
                return false;
            }
            !edit_times
                .iter()
                .any(|t| timestamp::strictly_between(&prev.end_time, t, &curr.start_time))
        })
        .count()
}
