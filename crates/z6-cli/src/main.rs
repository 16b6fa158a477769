//! Headless driver for the z6 engine.
//!
//! Thin by design: scenario loading, argument parsing, output
//! formatting, and exit codes live here; everything deterministic lives
//! in `z6-core`. Exit codes: 0 success, 1 assertion (or diff) failure,
//! 2 configuration error, 3 runtime error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use uuid::Uuid;

use z6_core::engine::executor::run_scenario;
use z6_core::error::{ScenarioError, Z6Error};
use z6_core::event::{read_log_file, write_log_file, EventLog, LogHeader};
use z6_core::metrics::{self, export, AssertionOutcome, Metrics};
use z6_core::scenario::model::Scenario;
use z6_core::scenario::validation::validate;
use z6_core::transport::TcpConnector;

/// Scenario files above this size are refused.
const MAX_SCENARIO_FILE_BYTES: u64 = 1024 * 1024;

const EXIT_OK: u8 = 0;
const EXIT_ASSERTION: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_RUNTIME: u8 = 3;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "z6", version, about = "Deterministic HTTP load testing")]
struct Cli {
    /// Output format for metrics.
    #[arg(long, global = true, value_enum, default_value = "summary")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a scenario and report metrics.
    Run {
        scenario: PathBuf,
        /// Override the scenario's PRNG seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Write the event log to this file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check a scenario file without running it.
    Validate { scenario: PathBuf },
    /// Verify a log's integrity and recompute its metrics.
    Replay { log: PathBuf },
    /// Compute metrics from a log.
    Analyze { log: PathBuf },
    /// Compare two logs record by record (exit 1 when they differ).
    Diff { log_a: PathBuf, log_b: PathBuf },
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Wall-clock wrapper around a run's deterministic output. Timestamps
/// exist only here; the event log never sees them.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
struct RunReport {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    seed: u64,
    metrics: Metrics,
    assertions: Vec<AssertionOutcome>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            ref scenario,
            seed,
            ref out,
        } => cmd_run(scenario, seed, out.as_deref(), cli.format),
        Command::Validate { ref scenario } => cmd_validate(scenario),
        Command::Replay { ref log } => cmd_replay(log, cli.format, true),
        Command::Analyze { ref log } => cmd_replay(log, cli.format, false),
        Command::Diff {
            ref log_a,
            ref log_b,
        } => cmd_diff(log_a, log_b),
    };
    ExitCode::from(code)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_run(
    scenario_path: &Path,
    seed_override: Option<u64>,
    out: Option<&Path>,
    format: OutputFormat,
) -> u8 {
    let mut scenario = match load_scenario(scenario_path) {
        Ok(s) => s,
        Err(message) => {
            eprintln!("error: {message}");
            return EXIT_CONFIG;
        }
    };
    if let Some(seed) = seed_override {
        scenario.runtime.prng_seed = Some(seed);
    }
    let errors = validate(&scenario);
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("error: {error}");
        }
        return EXIT_CONFIG;
    }

    let started_at = Utc::now();
    let outcome = match run_scenario(&scenario, Box::new(TcpConnector)) {
        Ok(outcome) => outcome,
        Err(error) => {
            eprintln!("error: {error}");
            return EXIT_RUNTIME;
        }
    };
    let finished_at = Utc::now();

    if let Some(path) = out {
        if let Err(error) = write_log_file(path, &outcome.log, outcome.seed, outcome.scenario_hash)
        {
            eprintln!("error: failed to write log: {error}");
            return EXIT_RUNTIME;
        }
    }

    let report = RunReport {
        run_id: Uuid::new_v4(),
        started_at,
        finished_at,
        seed: outcome.seed,
        metrics: outcome.metrics,
        assertions: outcome.assertions,
    };
    if print_report(&report, format).is_err() {
        return EXIT_RUNTIME;
    }

    if report.assertions.iter().any(|a| !a.passed) {
        EXIT_ASSERTION
    } else {
        EXIT_OK
    }
}

fn cmd_validate(scenario_path: &Path) -> u8 {
    let scenario = match load_scenario(scenario_path) {
        Ok(s) => s,
        Err(message) => {
            eprintln!("error: {message}");
            return EXIT_CONFIG;
        }
    };
    let errors = validate(&scenario);
    if errors.is_empty() {
        println!(
            "scenario ok: {} VUs for {}s against {}:{} ({} requests)",
            scenario.runtime.vus,
            scenario.runtime.duration_seconds,
            scenario.target.host,
            scenario.target.port,
            scenario.requests.len()
        );
        EXIT_OK
    } else {
        for error in &errors {
            eprintln!("error: {error}");
        }
        EXIT_CONFIG
    }
}

fn cmd_replay(log_path: &Path, format: OutputFormat, verbose: bool) -> u8 {
    let (header, log) = match read_log_file(log_path) {
        Ok(parsed) => parsed,
        Err(error) => {
            eprintln!("error: {error}");
            return EXIT_RUNTIME;
        }
    };
    if verbose {
        println!(
            "log ok: {} events, seed {}, version {}",
            log.len(),
            header.prng_seed,
            header.version
        );
    }
    let metrics = match metrics::reduce(&log) {
        Ok(metrics) => metrics,
        Err(error) => {
            eprintln!("error: {error}");
            return EXIT_RUNTIME;
        }
    };
    match print_metrics(&metrics, format) {
        Ok(()) => EXIT_OK,
        Err(_) => EXIT_RUNTIME,
    }
}

fn cmd_diff(path_a: &Path, path_b: &Path) -> u8 {
    let read = |path: &Path| -> Result<(LogHeader, EventLog), Z6Error> { read_log_file(path) };
    let (header_a, log_a) = match read(path_a) {
        Ok(v) => v,
        Err(error) => {
            eprintln!("error: {}: {error}", path_a.display());
            return EXIT_RUNTIME;
        }
    };
    let (header_b, log_b) = match read(path_b) {
        Ok(v) => v,
        Err(error) => {
            eprintln!("error: {}: {error}", path_b.display());
            return EXIT_RUNTIME;
        }
    };

    let report = diff_logs(&header_a, &log_a, &header_b, &log_b);
    for line in &report.differences {
        println!("{line}");
    }
    if report.identical {
        println!("logs are identical ({} events)", log_a.len());
        EXIT_OK
    } else {
        EXIT_ASSERTION
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

struct DiffReport {
    identical: bool,
    differences: Vec<String>,
}

fn diff_logs(
    header_a: &LogHeader,
    log_a: &EventLog,
    header_b: &LogHeader,
    log_b: &EventLog,
) -> DiffReport {
    let mut differences = Vec::new();

    if header_a.prng_seed != header_b.prng_seed {
        differences.push(format!(
            "seed: {} vs {}",
            header_a.prng_seed, header_b.prng_seed
        ));
    }
    if header_a.scenario_hash != header_b.scenario_hash {
        differences.push("scenario hash differs".to_string());
    }
    if log_a.len() != log_b.len() {
        differences.push(format!("event count: {} vs {}", log_a.len(), log_b.len()));
    }
    let first_divergence = log_a
        .iter()
        .zip(log_b.iter())
        .position(|(a, b)| a.to_bytes() != b.to_bytes());
    if let Some(index) = first_divergence {
        differences.push(format!("first divergent record: index {index}"));
    }

    DiffReport {
        identical: differences.is_empty(),
        differences,
    }
}

// ---------------------------------------------------------------------------
// Loading and printing
// ---------------------------------------------------------------------------

fn load_scenario(path: &Path) -> Result<Scenario, String> {
    let size = std::fs::metadata(path)
        .map_err(|e| format!("{}: {e}", path.display()))?
        .len();
    if size > MAX_SCENARIO_FILE_BYTES {
        return Err(Z6Error::Scenario(ScenarioError::FileTooLarge).to_string());
    }
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    toml::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<(), Z6Error> {
    match format {
        OutputFormat::Summary => {
            println!(
                "run {} seed {} ({} .. {})",
                report.run_id.hyphenated(),
                report.seed,
                report.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                report
                    .finished_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            );
            print!("{}", export::format_summary(&report.metrics, &report.assertions));
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Csv => print!("{}", export::to_csv(&report.metrics)?),
    }
    Ok(())
}

fn print_metrics(metrics: &Metrics, format: OutputFormat) -> Result<(), Z6Error> {
    match format {
        OutputFormat::Summary => print!("{}", export::format_summary(metrics, &[])),
        OutputFormat::Json => println!("{}", export::to_json(metrics)?),
        OutputFormat::Csv => print!("{}", export::to_csv(metrics)?),
    }
    Ok(())
}
