mod config;
mod copilot_dir;
mod devloop;
mod events;
mod pricing;
mod report;
mod telemetry;
mod timestamp;
mod toolchains;

use clap::Parser;
use config::Config;
use copilot_dir::{CopilotDir, DiscoveryError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Extract LLM efficiency metrics from a Copilot CLI session: token usage
/// and cost from the process log, turns, tool calls and build/test loops
/// from the session event log.
#[derive(Parser, Debug)]
#[command(name = "llm-efficiency", version, about)]
pub struct Cli {
    /// Session id, id prefix, or path to a session directory
    #[arg(value_name = "SESSION")]
    session: String,

    /// Explicit process log to read telemetry from
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Config file path (default: llm-efficiency.toml if present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Copilot CLI state directory (overrides config)
    #[arg(long, value_name = "PATH")]
    copilot_dir: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    match run(&cli) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    let config = config::load_config(
        cli.config.as_deref(),
        Path::new(config::DEFAULT_CONFIG_FILE),
    )?;
    render(cli, &config)
}

/// Run the whole pipeline for one session and return the JSON document.
fn render(cli: &Cli, config: &Config) -> Result<String, Box<dyn std::error::Error>> {
    let root = cli
        .copilot_dir
        .clone()
        .unwrap_or_else(|| config.paths.copilot_dir.clone());
    let copilot = CopilotDir::new(root);

    let session_dir = copilot.resolve_session(&cli.session)?;
    let events_path = session_dir.join(copilot_dir::EVENTS_FILE);
    let bytes = std::fs::read(&events_path).map_err(|source| DiscoveryError::ReadEvents {
        path: events_path.clone(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let events_count = text.lines().count();

    let mut parsed = events::parse_events(text.lines());
    tracing::info!(
        session_dir = %session_dir.display(),
        events = events_count,
        malformed = parsed.malformed_lines,
        "parsed event log"
    );

    let session_id = if parsed.session_started {
        parsed.session.id.clone()
    } else {
        session_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    if let Some(summary) = copilot_dir::read_workspace_summary(&session_dir) {
        parsed.session.summary = Some(summary);
    }

    let process_log = match &cli.log {
        Some(path) => copilot_dir::explicit_log(path),
        None => copilot.find_process_log(&session_id, config.analysis.log_scan_lines),
    };
    let llm_calls = match &process_log {
        Some(path) => telemetry::read_process_log(path, Some(session_id.as_str())),
        None => {
            tracing::info!(session_id = %session_id, "no process log, skipping telemetry");
            Vec::new()
        }
    };
    tracing::info!(calls = llm_calls.len(), "recovered LLM calls");

    let meta = report::Meta {
        session_dir: session_dir.display().to_string(),
        process_log: process_log.as_ref().map(|p| p.display().to_string()),
        events_count,
        llm_calls_found: llm_calls.len(),
    };
    let report = report::build_report(
        parsed,
        llm_calls,
        config.analysis.long_running_tool_ms,
        meta,
    );

    let json = if cli.pretty || config.output.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    Ok(json)
}
