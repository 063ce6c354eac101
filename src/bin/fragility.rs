//! Fragility CLI - Command-line interface for the fragility engine
//!
//! Commands:
//! - score: Score every (user, period) found in a batch of raw events
//! - explore: Print a user's annotated action sequence
//! - validate: Validate raw event input
//! - config: Print or check an engine configuration

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use fragility_engine::ingest::{RawActionAdapter, RawActionEvent};
use fragility_engine::report::render_text;
use fragility_engine::types::AnnotatedEvent;
use fragility_engine::{
    EngineConfig, EngineError, FragilityEngine, FragilityReport, PeriodId, TimeRange,
    ENGINE_VERSION, PRODUCER_NAME,
};

/// Fragility - Decision fragility scoring for user behavior event logs
#[derive(Parser)]
#[command(name = "fragility")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Score decision fragility from user action events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every (user, period) in the input
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only score this user
        #[arg(long)]
        user: Option<String>,

        /// Only score this period (e.g. 2024-01-15)
        #[arg(long)]
        period: Option<String>,
    },

    /// Print a user's annotated action sequence
    Explore {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// User to explore
        #[arg(long)]
        user: String,

        /// Range start (RFC 3339, inclusive); defaults to the first event
        #[arg(long)]
        from: Option<String>,

        /// Range end (RFC 3339, exclusive); defaults to just after the last event
        #[arg(long)]
        to: Option<String>,

        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate raw event input
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration, or check a configuration file
    Config {
        /// Configuration file to check
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one report per line)
    Ndjson,
    /// JSON array of reports
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Human-readable text report
    Text,
}

#[tokio::main]
async fn main() -> ExitCode {
    fragility_engine::telemetry::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), FragilityCliError> {
    match cli.command {
        Commands::Score {
            input,
            output,
            input_format,
            output_format,
            config,
            user,
            period,
        } => {
            cmd_score(
                &input,
                &output,
                input_format,
                output_format,
                config.as_deref(),
                user.as_deref(),
                period.as_deref(),
            )
            .await
        }

        Commands::Explore {
            input,
            input_format,
            user,
            from,
            to,
            config,
            json,
        } => {
            cmd_explore(
                &input,
                input_format,
                &user,
                from.as_deref(),
                to.as_deref(),
                config.as_deref(),
                json,
            )
            .await
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Config { check } => cmd_config(check.as_deref()),
    }
}

async fn cmd_score(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
    user: Option<&str>,
    period: Option<&str>,
) -> Result<(), FragilityCliError> {
    let config = load_config(config)?;
    let events = read_events(input, &input_format)?;
    if events.is_empty() {
        return Err(FragilityCliError::NoEvents);
    }

    let engine = FragilityEngine::in_memory();
    let recorded = engine.ingest_raw(&events).await?;

    let period = period.map(PeriodId::parse).transpose()?;

    // Every (user, period) pair touched by the input, after filtering
    let mut keys: BTreeSet<(String, PeriodId)> = BTreeSet::new();
    for event in &recorded {
        if user.is_some_and(|u| u != event.user_id) {
            continue;
        }
        let event_period = match &period {
            Some(p) => p.clone(),
            None => config.period_scheme.period_for(event.timestamp)?,
        };
        keys.insert((event.user_id.clone(), event_period));
    }

    if keys.is_empty() {
        return Err(FragilityCliError::NoReports);
    }

    let mut reports: Vec<FragilityReport> = Vec::with_capacity(keys.len());
    for (user_id, period_id) in &keys {
        reports.push(engine.compute(user_id, period_id, &config).await?);
    }

    let output_data = format_output(&reports, &output_format)?;
    write_output(output, &output_data)
}

async fn cmd_explore(
    input: &Path,
    input_format: InputFormat,
    user: &str,
    from: Option<&str>,
    to: Option<&str>,
    config: Option<&Path>,
    json: bool,
) -> Result<(), FragilityCliError> {
    let config = load_config(config)?;
    let events = read_events(input, &input_format)?;

    let engine = FragilityEngine::in_memory();
    let recorded = engine.ingest_raw(&events).await?;

    let user_times: Vec<DateTime<Utc>> = recorded
        .iter()
        .filter(|e| e.user_id == user)
        .map(|e| e.timestamp)
        .collect();

    let start = match from {
        Some(s) => parse_instant(s)?,
        None => user_times.iter().min().copied().unwrap_or_else(Utc::now),
    };
    let end = match to {
        Some(s) => parse_instant(s)?,
        None => user_times
            .iter()
            .max()
            .map(|t| *t + Duration::seconds(1))
            .unwrap_or(start + Duration::seconds(1)),
    };
    let range = TimeRange::new(start, end).ok_or_else(|| {
        FragilityCliError::InvalidArgument(format!("empty range: {start} to {end}"))
    })?;

    let annotated = engine.explore_sequence(user, range, &config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&annotated)?);
    } else {
        print_sequence(user, &annotated);
    }

    Ok(())
}

fn print_sequence(user: &str, annotated: &[AnnotatedEvent]) {
    println!("Action Sequence: {user}");
    println!("================");
    if annotated.is_empty() {
        println!("  (no events in range)");
        return;
    }
    for item in annotated {
        let event = &item.event;
        let incoming = match &item.incoming {
            Some(t) if t.reversal => format!("<- {} [REVERSAL]", t.from),
            Some(t) => format!("<- {}", t.from),
            None => String::new(),
        };
        println!(
            "  #{:<5} {}  {:<16} {}",
            event.sequence_no,
            event.timestamp.to_rfc3339(),
            event.action_type,
            incoming
        );
    }
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), FragilityCliError> {
    let events = read_events(input, &input_format)?;

    let results = RawActionAdapter::validate_events(&events);

    let report = ValidationReport {
        total_events: events.len(),
        valid_events: events.len() - results.len(),
        invalid_events: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                user_id: r.user_id.clone(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Event {} (user {}): {}",
                    err.index, err.user_id, err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(FragilityCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_config(check: Option<&Path>) -> Result<(), FragilityCliError> {
    let config = load_config(check)?;
    if check.is_some() {
        eprintln!("Configuration is valid ({PRODUCER_NAME} {ENGINE_VERSION})");
    }
    println!("{}", config.to_json()?);
    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, FragilityCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_events(input: &Path, input_format: &InputFormat) -> Result<Vec<RawActionEvent>, FragilityCliError> {
    let input_data = read_input(input)?;
    let events = match input_format {
        InputFormat::Ndjson => RawActionAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => RawActionAdapter::parse_array(&input_data)?,
    };
    Ok(events)
}

fn write_output(output: &Path, data: &str) -> Result<(), FragilityCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, FragilityCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_file(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, FragilityCliError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| FragilityCliError::InvalidArgument(format!("{value}: {e}")))
}

fn format_output(reports: &[FragilityReport], format: &OutputFormat) -> Result<String, FragilityCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for report in reports {
                lines.push(serde_json::to_string(report)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(reports)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(reports)?),
        OutputFormat::Text => {
            let rendered: Vec<String> = reports.iter().map(render_text).collect();
            Ok(rendered.join("\n\n") + "\n")
        }
    }
}

// Error types

#[derive(Debug)]
enum FragilityCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoEvents,
    NoReports,
    ValidationFailed(usize),
    InvalidArgument(String),
}

impl From<io::Error> for FragilityCliError {
    fn from(e: io::Error) -> Self {
        FragilityCliError::Io(e)
    }
}

impl From<EngineError> for FragilityCliError {
    fn from(e: EngineError) -> Self {
        FragilityCliError::Engine(e)
    }
}

impl From<serde_json::Error> for FragilityCliError {
    fn from(e: serde_json::Error) -> Self {
        FragilityCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FragilityCliError> for CliError {
    fn from(e: FragilityCliError) -> Self {
        match e {
            FragilityCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FragilityCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EngineError::InvalidEvent(_) => ("INVALID_EVENT", "Run 'fragility validate' for details"),
                    EngineError::InvalidConfig(_) => ("INVALID_CONFIG", "Run 'fragility config' to see a valid configuration"),
                    EngineError::InvalidPeriod(_) => ("INVALID_PERIOD", "Use YYYY-MM-DD or <RFC3339 start>/PT<seconds>S"),
                    EngineError::Json(_) => ("PARSE_ERROR", "Ensure input contains user_id, action and timestamp fields"),
                    EngineError::ComputationTimeout { .. } => ("TIMEOUT", "Raise time_budget_ms or retry"),
                    EngineError::StoreUnavailable(_) => ("STORE_UNAVAILABLE", "Retry later"),
                    EngineError::StoreBackend(_) => ("STORE_ERROR", "Check the storage backend; retrying will not help"),
                    EngineError::NotFound { .. } => ("NOT_FOUND", "Compute the report first"),
                    EngineError::TaskFailed(_) => ("INTERNAL_ERROR", "Retry; report the issue if it persists"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            FragilityCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FragilityCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FragilityCliError::NoReports => CliError {
                code: "NO_REPORTS".to_string(),
                message: "No (user, period) matched the filters".to_string(),
                hint: Some("Check --user and --period".to_string()),
            },
            FragilityCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            FragilityCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: None,
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    user_id: String,
    error: String,
}
