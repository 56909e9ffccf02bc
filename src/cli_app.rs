//! Top-level CLI definition and dispatch.

use std::fs::File;
use std::io::{self, BufReader, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use thiserror::Error;

use snr_collector::core::clock::SystemClock;
use snr_collector::core::config::Config;
use snr_collector::core::errors::SnrError;
use snr_collector::logger::activity::{ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger};
use snr_collector::logger::jsonl::JsonlConfig;
use snr_collector::parser::{self, FrameParser, ReplaySummary};
use snr_collector::retention::sweeper::SweepReport;
use snr_collector::retention::{self, SweepTarget};

/// Banknote serial-number collector.
#[derive(Debug, Parser)]
#[command(
    name = "snrd",
    author,
    version,
    about = "Serial-number collector for banknote counting devices",
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
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the collector against the configured serial port.
    Daemon(DaemonArgs),
    /// Run the retention sweeps once.
    Sweep(SweepArgs),
    /// Feed a captured byte stream through the parser.
    Replay(ReplayArgs),
    /// Inspect the effective configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DaemonArgs {
    /// Do not schedule the retention jobs.
    #[arg(long)]
    no_retention: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct SweepArgs {
    /// Sweep the image tree.
    #[arg(long)]
    images: bool,
    /// Sweep the status log directory.
    #[arg(long)]
    logs: bool,
}

impl SweepArgs {
    /// Both trees unless one is named.
    fn targets(&self) -> Vec<SweepTarget> {
        match (self.images, self.logs) {
            (true, false) => vec![SweepTarget::Images],
            (false, true) => vec![SweepTarget::Logs],
            _ => vec![SweepTarget::Images, SweepTarget::Logs],
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// Captured device stream.
    file: PathBuf,
    /// Read size used to split the capture; defaults to `serial.read_chunk_bytes`.
    #[arg(long, value_name = "BYTES")]
    chunk_bytes: Option<usize>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print effective merged configuration.
    Show,
    /// Print resolved config file path.
    Path,
    /// Validate configuration and exit.
    Validate,
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
    /// Operation partially succeeded.
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

/// Failures worth retrying are runtime errors; the rest need the user to act.
impl From<SnrError> for CliError {
    fn from(err: SnrError) -> Self {
        if err.is_retryable() {
            Self::Runtime(err.to_string())
        } else {
            Self::User(err.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Sweep(args) => run_sweep(cli, args),
        Command::Replay(args) => run_replay(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::User(e.to_string()))
}

fn start_logger(config: &Config) -> Result<(ActivityLoggerHandle, JoinHandle<()>), CliError> {
    spawn_logger(ActivityLoggerConfig {
        jsonl_config: JsonlConfig {
            path: config.paths.activity_log.clone(),
            ..JsonlConfig::default()
        },
        ..ActivityLoggerConfig::default()
    })
    .map_err(|e| CliError::Runtime(e.to_string()))
}

fn stop_logger(logger: &ActivityLoggerHandle, join: JoinHandle<()>) {
    logger.shutdown();
    if join.join().is_err() {
        eprintln!("snrd: activity logger thread panicked");
    }
}

#[cfg(feature = "serial")]
fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    use snr_collector::daemon::service::{Collector, CollectorOptions};
    use snr_collector::link::serial::SerialOpener;

    let config = load_config(cli)?;
    let opener = SerialOpener::from_config(&config.serial);
    let mut options = CollectorOptions::production();
    options.schedule_retention = !args.no_retention;

    let summary = Collector::new(config, options)
        .run(opener)?;

    if output_mode(cli) == OutputMode::Json {
        write_json_line(&json!({
            "command": "daemon",
            "uptime_secs": summary.uptime_secs,
            "clean_shutdown": summary.clean_shutdown,
            "bytes_read": summary.reader.bytes_read,
            "batches": summary.parser.batches,
            "notes": summary.parser.notes,
            "status_frames": summary.parser.status_frames,
        }))?;
    }

    if summary.clean_shutdown {
        Ok(())
    } else {
        Err(CliError::Partial("collector stopped without a clean shutdown".to_string()))
    }
}

#[cfg(not(feature = "serial"))]
fn run_daemon(_cli: &Cli, _args: &DaemonArgs) -> Result<(), CliError> {
    Err(CliError::User(
        "snrd was built without the `serial` feature; the daemon needs a serial link".to_string(),
    ))
}

fn run_sweep(cli: &Cli, args: &SweepArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let (logger, join) = start_logger(&config)?;
    let clock = SystemClock;

    let outcomes: Vec<(SweepTarget, Result<SweepReport, String>)> = args
        .targets()
        .into_iter()
        .map(|target| {
            let outcome = retention::run_sweep(target, &config, &clock, &logger)
                .map_err(|e| e.to_string());
            (target, outcome)
        })
        .collect();
    stop_logger(&logger, join);

    let failures = outcomes.iter().filter(|(_, o)| o.is_err()).count();
    match output_mode(cli) {
        OutputMode::Human => {
            for (target, outcome) in &outcomes {
                match outcome {
                    Ok(report) => {
                        println!(
                            "{}: removed {}, kept {}, skipped {}, failed {} ({})",
                            target.job_name(),
                            report.removed.len(),
                            report.kept,
                            report.skipped.len(),
                            report.failed.len(),
                            report.root.display()
                        );
                        for path in &report.removed {
                            println!("  removed {}", path.display());
                        }
                    }
                    Err(error) => println!("{}: {error}", target.job_name()),
                }
            }
        }
        OutputMode::Json => {
            let jobs: Vec<Value> = outcomes
                .iter()
                .map(|(target, outcome)| match outcome {
                    Ok(report) => sweep_json(*target, report),
                    Err(error) => json!({ "job": target.job_name(), "error": error }),
                })
                .collect();
            write_json_line(&json!({ "command": "sweep", "jobs": jobs }))?;
        }
    }

    match failures {
        0 => Ok(()),
        n if n == outcomes.len() => Err(CliError::Runtime("every sweep failed".to_string())),
        _ => Err(CliError::Partial("some sweeps failed".to_string())),
    }
}

fn sweep_json(target: SweepTarget, report: &SweepReport) -> Value {
    json!({
        "job": target.job_name(),
        "root": report.root.to_string_lossy(),
        "removed": report.removed.iter().map(|p| p.to_string_lossy()).collect::<Vec<_>>(),
        "kept": report.kept,
        "skipped": report.skipped.len(),
        "failed": report.failed.len(),
    })
}

fn run_replay(cli: &Cli, args: &ReplayArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let input = File::open(&args.file)
        .map_err(|e| CliError::User(format!("cannot open {}: {e}", args.file.display())))?;
    let chunk_bytes = args.chunk_bytes.unwrap_or(config.serial.read_chunk_bytes);

    let (logger, join) = start_logger(&config)?;
    let mut frame_parser = FrameParser::new(&config, Arc::new(SystemClock), logger.clone());
    let outcome = parser::replay(&mut frame_parser, BufReader::new(input), chunk_bytes);
    stop_logger(&logger, join);
    let summary = outcome?;

    let aborted: Vec<&str> = summary
        .cycles
        .iter()
        .filter_map(|c| c.aborted.as_deref())
        .collect();
    match output_mode(cli) {
        OutputMode::Human => print_replay(&summary, &aborted),
        OutputMode::Json => write_json_line(&replay_json(&summary, &aborted))?,
    }

    if aborted.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(format!("{} cycle(s) aborted", aborted.len())))
    }
}

fn print_replay(summary: &ReplaySummary, aborted: &[&str]) {
    println!(
        "replayed {} bytes in {} cycle(s)",
        summary.bytes_read,
        summary.cycles.len()
    );
    for batch in summary.cycles.iter().flat_map(|c| &c.batches) {
        println!(
            "  batch {}: {} note(s) -> {}",
            batch.batch_index,
            batch.note_count,
            batch.ini_path.display()
        );
    }
    let status: usize = summary.cycles.iter().map(|c| c.status_frames).sum();
    let corrupt: usize = summary.cycles.iter().map(|c| c.corrupt_frames).sum();
    println!("  status frames: {status}, corrupt frames: {corrupt}");
    if summary.incomplete_tail > 0 {
        println!("  {} trailing byte(s) never completed", summary.incomplete_tail);
    }
    for reason in aborted {
        println!("  aborted: {reason}");
    }
}

fn replay_json(summary: &ReplaySummary, aborted: &[&str]) -> Value {
    let batches: Vec<Value> = summary
        .cycles
        .iter()
        .flat_map(|c| &c.batches)
        .map(|b| {
            json!({
                "batch": b.batch_index,
                "notes": b.note_count,
                "images": b.images.iter().map(|p| p.to_string_lossy()).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "command": "replay",
        "bytes_read": summary.bytes_read,
        "cycles": summary.cycles.len(),
        "status_frames": summary.cycles.iter().map(|c| c.status_frames).sum::<usize>(),
        "corrupt_frames": summary.cycles.iter().map(|c| c.corrupt_frames).sum::<usize>(),
        "dropped_bytes": summary.cycles.iter().map(|c| c.dropped_bytes).sum::<usize>(),
        "batches": batches,
        "incomplete_tail": summary.incomplete_tail,
        "aborted": aborted,
    })
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = config
                        .to_toml()
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    write_json_line(&json!({ "command": "config show", "config": value }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": exists,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                    }
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": true,
                        "path": config.paths.config_file.to_string_lossy(),
                    }))?,
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": false,
                        "code": e.code(),
                        "error": e.to_string(),
                    }))?,
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SNR_OUTPUT_FORMAT").ok();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_subcommand() {
        let cli = Cli::try_parse_from(["snrd", "daemon", "--no-retention"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Daemon(DaemonArgs { no_retention: true })
        ));

        let cli = Cli::try_parse_from(["snrd", "replay", "capture.bin", "--chunk-bytes", "7"])
            .unwrap();
        match cli.command {
            Command::Replay(args) => {
                assert_eq!(args.file, PathBuf::from("capture.bin"));
                assert_eq!(args.chunk_bytes, Some(7));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["snrd", "config"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigArgs { command: None })
        ));
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli =
            Cli::try_parse_from(["snrd", "sweep", "--logs", "--config", "/tmp/snr.toml", "--json"])
                .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/snr.toml")));
    }

    #[test]
    fn sweep_targets_default_to_both() {
        assert_eq!(
            SweepArgs::default().targets(),
            vec![SweepTarget::Images, SweepTarget::Logs]
        );
        let logs_only = SweepArgs {
            images: false,
            logs: true,
        };
        assert_eq!(logs_only.targets(), vec![SweepTarget::Logs]);
        let both = SweepArgs {
            images: true,
            logs: true,
        };
        assert_eq!(both.targets().len(), 2);
    }

    #[test]
    fn replay_requires_a_file() {
        assert!(Cli::try_parse_from(["snrd", "replay"]).is_err());
    }

    #[test]
    fn exit_codes_are_distinct_per_class() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }

    #[test]
    fn collector_errors_map_to_exit_class() {
        let schedule = CliError::from(SnrError::InvalidSchedule {
            expression: "bogus".to_string(),
            details: "unparseable".to_string(),
        });
        assert_eq!(schedule.exit_code(), 1);
        assert!(schedule.to_string().contains("SNR-1004"));

        let io = CliError::from(SnrError::io("/srv/snr/images", io::Error::other("disk gone")));
        assert_eq!(io.exit_code(), 2);

        let link = CliError::from(SnrError::Link {
            port: "/dev/ttyUSB0".to_string(),
            details: "unplugged".to_string(),
        });
        assert_eq!(link.exit_code(), 2);
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }
}
