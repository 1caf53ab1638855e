//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use loop_status_core::controller::render::{JsonLinesRenderer, NullRenderer, Renderer};
use loop_status_core::core::clock::SystemClock;
use loop_status_core::core::config::Config;
use loop_status_core::core::errors::LscError;
use loop_status_core::daemon::loop_main::StatusRuntime;
use loop_status_core::daemon::signals::SignalHandler;
use loop_status_core::fetch::model::{
    DoseEntry, DoseKind, DoseUnit, RecommendedTempBasal, TempBasalRecommendation,
};
use loop_status_core::fetch::stores::StoreSet;
use loop_status_core::logger::activity::{ActivityLoggerConfig, spawn_logger};
use loop_status_core::sim::scenario::{self, Scenario, ScenarioReport};
use loop_status_core::sim::stores::SimulatedStores;
use loop_status_core::status::actions::action_for_selection;
use loop_status_core::status::mode::{BasalDeliveryState, BolusState, StatusRowMode, derive};

/// Loop Status Core: refresh and status-row logic for an insulin dosing status screen.
#[derive(Debug, Parser)]
#[command(
    name = "lsc",
    author,
    version,
    about = "Loop Status Core - status screen refresh and status-row engine",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a scripted scenario against simulated stores.
    Simulate(SimulateArgs),
    /// Run the controller live against simulated stores until interrupted.
    Watch(WatchArgs),
    /// Evaluate the status-row mode for a set of device signals.
    Derive(DeriveArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Scenario TOML file.
    #[arg(value_name = "PATH")]
    scenario: PathBuf,
    /// Stream every render as a JSON line while the scenario runs.
    #[arg(long)]
    follow: bool,
    /// Write activity events to the configured JSONL log.
    #[arg(long)]
    log: bool,
}

#[derive(Debug, Clone, Args)]
struct WatchArgs {
    /// Stop after this many seconds (runs until SIGINT/SIGTERM when omitted).
    #[arg(long, value_name = "SECONDS")]
    duration_secs: Option<u64>,
    /// Probability that any single fetch fails.
    #[arg(long, default_value_t = 0.0, value_name = "RATE")]
    failure_rate: f64,
    /// Seed for the failure generator.
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Simulated store latency in milliseconds.
    #[arg(long, default_value_t = 0, value_name = "MS")]
    latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BolusArg {
    None,
    Initiating,
    InProgress,
    Canceling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BasalArg {
    Active,
    Suspended,
    Resuming,
}

impl From<BasalArg> for BasalDeliveryState {
    fn from(value: BasalArg) -> Self {
        match value {
            BasalArg::Active => Self::Active,
            BasalArg::Suspended => Self::Suspended,
            BasalArg::Resuming => Self::Resuming,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct DeriveArgs {
    #[arg(long, value_enum, default_value_t = BolusArg::None)]
    bolus: BolusArg,
    #[arg(long, value_enum, default_value_t = BasalArg::Active)]
    basal: BasalArg,
    /// Recommended temp basal rate in U/hr (30 minute duration).
    #[arg(long, value_name = "U/HR")]
    recommendation: Option<f64>,
    /// Minutes until an in-progress bolus finishes.
    #[arg(long, default_value_t = 5, value_name = "MINUTES")]
    bolus_ends_in: i64,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration file.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation completed but some checks failed.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<LscError> for CliError {
    fn from(value: LscError) -> Self {
        match value {
            LscError::InvalidConfig { .. }
            | LscError::MissingConfig { .. }
            | LscError::ConfigParse { .. }
            | LscError::InvalidScenario { .. } => Self::User(value.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Simulate(args) => run_simulate(cli, args),
        Command::Watch(args) => run_watch(cli, args),
        Command::Derive(args) => run_derive(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── simulate ────────────────────

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let scenario = Scenario::load(&args.scenario)?;

    let renderer: Box<dyn Renderer> = if args.follow {
        Box::new(JsonLinesRenderer::new(io::stdout()))
    } else {
        Box::new(NullRenderer)
    };
    let logger = if args.log {
        Some(spawn_logger(ActivityLoggerConfig::from_config(&config))?)
    } else {
        None
    };

    let report = scenario::run(
        &scenario,
        config,
        renderer,
        logger.as_ref().map(|(handle, _)| handle.clone()),
    );
    if let Some((handle, join)) = logger {
        handle.shutdown();
        let _ = join.join();
    }
    let report = report?;

    match output_mode(cli) {
        OutputMode::Human => print_report_human(&report),
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&report)?;
            if let Value::Object(map) = &mut payload {
                map.insert("command".to_string(), json!("simulate"));
                map.insert("passed".to_string(), json!(report.passed()));
            }
            write_json_line(&payload)?;
        }
    }

    if report.passed() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} expectation(s) failed",
            report.mismatches.len()
        )))
    }
}

fn print_report_human(report: &ScenarioReport) {
    println!("{} {}", "Scenario".bold(), report.name);
    for step in &report.steps {
        let pending = if step.pending.is_empty() {
            String::from("-")
        } else {
            step.pending.join(",")
        };
        println!(
            "  {:>3}  {:<22} passes={:<4} pending={:<28} {}",
            step.index,
            step.step,
            step.passes,
            pending,
            step.mode.cyan()
        );
    }
    println!(
        "  passes={} fetch_failures={} reruns={} refused={} actions={}",
        report.stats.passes,
        report.stats.fetch_failures,
        report.stats.reruns,
        report.stats.refusals,
        report.stats.actions_settled
    );
    if report.passed() {
        println!("{} final mode {}", "PASS".green().bold(), report.final_mode);
    } else {
        for mismatch in &report.mismatches {
            println!("  {} {mismatch}", "✗".red());
        }
        println!("{}", "FAIL".red().bold());
    }
}

// ──────────────────── watch ────────────────────

fn run_watch(cli: &Cli, args: &WatchArgs) -> Result<(), CliError> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(CliError::User(
            "--failure-rate must be within [0, 1]".to_string(),
        ));
    }
    let config = Config::load(cli.config.as_deref())?;
    let stores = SimulatedStores::new(Utc::now());
    stores.set_random_failures(args.failure_rate, args.seed);
    stores.set_fetch_latency(Duration::from_millis(args.latency_ms));

    let mut runtime = StatusRuntime::init(
        config,
        StoreSet::uniform(Arc::new(stores.clone())),
        Arc::new(stores),
        Box::new(JsonLinesRenderer::new(io::stderr())),
        Arc::new(SystemClock),
        SignalHandler::new(),
    )?;
    let summary = runtime.run(args.duration_secs.map(Duration::from_secs))?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Stopped ({}): {} passes, {} ticks, uptime {:.1}s",
                summary.reason.label(),
                summary.passes,
                summary.ticks,
                summary.uptime.as_secs_f64()
            );
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "watch",
                "reason": summary.reason.label(),
                "passes": summary.passes,
                "ticks": summary.ticks,
                "uptime_ms": u64::try_from(summary.uptime.as_millis()).unwrap_or(u64::MAX),
            }))?;
        }
    }
    Ok(())
}

// ──────────────────── derive ────────────────────

fn run_derive(cli: &Cli, args: &DeriveArgs) -> Result<(), CliError> {
    if args.bolus_ends_in < 0 {
        return Err(CliError::User("--bolus-ends-in must not be negative".to_string()));
    }
    let now = Utc::now();
    let bolus_end = chrono::Duration::try_minutes(args.bolus_ends_in)
        .and_then(|remaining| now.checked_add_signed(remaining))
        .ok_or_else(|| {
            CliError::User(format!(
                "--bolus-ends-in {} is out of range",
                args.bolus_ends_in
            ))
        })?;
    let bolus = match args.bolus {
        BolusArg::None => BolusState::None,
        BolusArg::Initiating => BolusState::Initiating,
        BolusArg::Canceling => BolusState::Canceling,
        BolusArg::InProgress => BolusState::InProgress(DoseEntry {
            kind: DoseKind::Bolus,
            start: now,
            end: bolus_end,
            value: 0.0,
            unit: DoseUnit::Units,
        }),
    };
    let recommendation = args.recommendation.map(|units_per_hour| RecommendedTempBasal {
        recommendation: TempBasalRecommendation {
            units_per_hour,
            duration_minutes: 30.0,
        },
        date: now,
    });

    let mode = derive(&bolus, args.basal.into(), recommendation.as_ref(), now);
    let action = action_for_selection(&mode);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", mode_colored(&mode));
            match action {
                Some(plan) => println!("  selecting the row: {}", plan.action),
                None => println!("  selecting the row: no action"),
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "derive",
                "mode": serde_json::to_value(&mode)?,
                "label": mode.label(),
                "has_row": mode.has_row(),
                "action": action.map(|plan| plan.action.label()),
            }))?;
        }
    }
    Ok(())
}

fn mode_colored(mode: &StatusRowMode) -> colored::ColoredString {
    let text = mode.to_string();
    match mode {
        StatusRowMode::Hidden => text.dimmed(),
        StatusRowMode::PumpSuspended { .. } => text.yellow().bold(),
        StatusRowMode::CancelingBolus | StatusRowMode::EnactingBolus => text.magenta(),
        StatusRowMode::Bolusing { .. } => text.blue(),
        StatusRowMode::RecommendedTempBasal { .. } => text.green(),
    }
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("LSC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
