//! BackUP - Command-line interface for the backup engine.
//!
//! Lists registered jobs, runs batches with live progress, and inspects the
//! progress state and transfer log left behind by earlier runs.

mod selection;

use anyhow::{bail, Context};
use backup_engine::{
    config::default_data_dir, names_match, BackupEngine, EngineConfig, ExecutionStrategy,
    ProgressState, ProgressStatus, ProgressTracker, RunScope,
};
use chrono::{Local, NaiveDate};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// BackUP - Run and monitor backup jobs
#[derive(Parser, Debug)]
#[command(name = "backup")]
#[command(version = "0.1.0")]
#[command(about = "Run full and differential backup jobs with progress tracking")]
struct Cli {
    /// Configuration file (defaults to config.json in the data directory)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Enable debug diagnostics
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered jobs with their selection index
    List,
    /// Run a batch of jobs
    Run(RunArgs),
    /// Show saved progress of one job or all jobs
    Status {
        /// Job name
        name: Option<String>,
    },
    /// Remove the saved progress of a job
    Clear {
        /// Job name
        name: String,
    },
    /// Print the transfer log of one day
    Log {
        /// Day to print, YYYY-MM-DD (defaults to today)
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
    },
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("selection").required(true).args(["jobs", "select", "all"])))]
struct RunArgs {
    /// Comma-separated job names
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    jobs: Vec<String>,

    /// Job indexes: "2", "1,3", "2-4" or "all"
    #[arg(long, value_name = "SELECTION")]
    select: Option<String>,

    /// Run every registered job
    #[arg(long)]
    all: bool,

    /// Run the jobs concurrently instead of one after another
    #[arg(long)]
    parallel: bool,

    /// Read p (pause), r (resume) and c (cancel) commands from stdin
    #[arg(long)]
    interactive: bool,
}

/// Polls the progress tracker and renders one line per job change.
struct ProgressMonitor {
    tracker: Arc<ProgressTracker>,
    jobs: Vec<String>,
    last_seen: HashMap<String, (ProgressStatus, u64)>,
}

impl ProgressMonitor {
    fn new(tracker: Arc<ProgressTracker>, jobs: Vec<String>) -> Self {
        ProgressMonitor {
            tracker,
            jobs,
            last_seen: HashMap::new(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let percent = percent.min(100);
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!(
            "[{}{}] {}%",
            "=".repeat(filled),
            " ".repeat(empty),
            percent
        )
    }

    fn percent(state: &ProgressState) -> u32 {
        if state.total_bytes > 0 {
            (state.bytes_copied as f64 / state.total_bytes as f64 * 100.0) as u32
        } else if state.total_files > 0 {
            (state.files_copied as f64 / state.total_files as f64 * 100.0) as u32
        } else {
            100
        }
    }

    fn render(state: &ProgressState) -> String {
        format!(
            "{:<16} {} {}/{} files | {}/{} | {}",
            state.job_name,
            Self::print_progress_bar(Self::percent(state)),
            state.files_copied,
            state.total_files,
            Self::format_bytes(state.bytes_copied),
            Self::format_bytes(state.total_bytes),
            state.status
        )
    }

    /// Print the jobs whose status or copied-file count changed.
    fn poll(&mut self) {
        for job in &self.jobs {
            let Some(state) = self.tracker.get(job) else {
                continue;
            };
            let key = (state.status, state.files_copied);
            if self.last_seen.get(job) != Some(&key) {
                eprintln!("{}", Self::render(&state));
                self.last_seen.insert(job.clone(), key);
            }
        }
        let _ = io::stderr().flush();
    }
}

/// Parse and validate command-line arguments, then run the command
fn main() {
    let cli = Cli::parse();

    let exit_code = match load_config(&cli) {
        Ok(config) => {
            init_logging(&config.log_level, cli.verbose);
            match run_cli(&cli, &config) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    2
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_data_dir().join("config.json"));
    EngineConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the configured level.
fn init_logging(level: &str, verbose: bool) {
    let fallback = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("backup_engine={},backup={}", fallback, fallback)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// Main CLI logic - separated for testability.
///
/// Returns the process exit code: 0 on success, 1 if any job failed.
fn run_cli(cli: &Cli, config: &EngineConfig) -> anyhow::Result<i32> {
    match &cli.command {
        Command::List => list_jobs(config),
        Command::Run(args) => run_batch(args, config),
        Command::Status { name } => show_status(name.as_deref(), config),
        Command::Clear { name } => {
            let tracker = ProgressTracker::new(config.state_file());
            if !tracker.clear(name) {
                bail!("No saved progress for job '{}'", name);
            }
            println!("Cleared progress of {}", name);
            Ok(0)
        }
        Command::Log { date } => show_log(*date, config),
    }
}

fn list_jobs(config: &EngineConfig) -> anyhow::Result<i32> {
    let engine = BackupEngine::from_config(config)?;
    let jobs = engine.registry().list_jobs()?;
    if jobs.is_empty() {
        println!("No jobs registered in {}", config.jobs_file().display());
    }
    for (index, job) in jobs.iter().enumerate() {
        println!(
            "{:>3}. {} [{}] {} -> {}",
            index + 1,
            job.name,
            job.mode,
            job.source.display(),
            job.target.display()
        );
    }
    Ok(0)
}

fn resolve_selection(args: &RunArgs, engine: &BackupEngine) -> anyhow::Result<Vec<String>> {
    if !args.jobs.is_empty() {
        return Ok(args
            .jobs
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect());
    }
    let registered: Vec<String> = engine
        .registry()
        .list_jobs()?
        .into_iter()
        .map(|job| job.name)
        .collect();
    if args.all {
        return Ok(registered);
    }
    let input = args.select.as_deref().unwrap_or_default();
    selection::parse_selection(input, &registered).map_err(anyhow::Error::msg)
}

/// Forward `p`/`r`/`c` lines from stdin to the batch scope.
///
/// The reader thread is detached: it may still be blocked on stdin when the
/// batch ends.
fn spawn_control_reader(scope: RunScope) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.trim().to_lowercase().as_str() {
                "p" | "pause" => {
                    scope.pause();
                    eprintln!("Paused. Type r to resume, c to cancel.");
                }
                "r" | "resume" => {
                    scope.resume();
                    eprintln!("Resumed.");
                }
                "c" | "cancel" => {
                    scope.cancel();
                    eprintln!("Cancelling...");
                    break;
                }
                "" => {}
                other => eprintln!("Unknown command '{}'. Use p, r or c.", other),
            }
        }
    });
}

fn run_batch(args: &RunArgs, config: &EngineConfig) -> anyhow::Result<i32> {
    let engine = BackupEngine::from_config(config)?;
    let names = resolve_selection(args, &engine)?;
    if names.is_empty() {
        bail!("No jobs selected");
    }
    let strategy = if args.parallel {
        ExecutionStrategy::Parallel
    } else {
        config.strategy
    };

    let scope = engine.new_scope();
    tracing::debug!(scope = %scope.id(), jobs = ?names, ?strategy, "starting batch");
    if args.interactive {
        eprintln!("Controls: p = pause, r = resume, c = cancel");
        spawn_control_reader(scope.clone());
    }

    let started = Instant::now();
    let done = AtomicBool::new(false);
    let mut monitor = ProgressMonitor::new(engine.tracker(), names.clone());
    let report = thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                monitor.poll();
                thread::sleep(Duration::from_millis(200));
            }
            monitor.poll();
        });
        let report = engine.run_in_scope(&scope, names.iter().cloned(), strategy);
        done.store(true, Ordering::SeqCst);
        report
    });

    eprintln!();
    for line in report.messages() {
        println!("{}", line);
    }
    eprintln!("Elapsed: {}", ProgressMonitor::format_duration(started.elapsed()));

    Ok(if report.has_failures() { 1 } else { 0 })
}

fn show_status(name: Option<&str>, config: &EngineConfig) -> anyhow::Result<i32> {
    let path = config.state_file();
    let store = ProgressTracker::read_store(&path)?;
    let states: Vec<&ProgressState> = match name {
        Some(name) => {
            let found: Vec<_> = store
                .values()
                .filter(|state| names_match(&state.job_name, name))
                .collect();
            if found.is_empty() {
                bail!("No saved progress for job '{}'", name);
            }
            found
        }
        None => store.values().collect(),
    };
    if states.is_empty() {
        println!("No saved progress in {}", path.display());
    }
    for state in states {
        println!("{}", ProgressMonitor::render(state));
        println!("    updated: {}", state.timestamp.format("%Y-%m-%d %H:%M:%S"));
        if let Some(source) = &state.current_source {
            println!("    current: {}", source.display());
        }
        if let Some(error) = &state.last_error {
            println!("    error:   {}", error);
        }
    }
    Ok(0)
}

fn show_log(date: Option<NaiveDate>, config: &EngineConfig) -> anyhow::Result<i32> {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let engine = BackupEngine::from_config(config)?;
    let records = engine.logger().read_day(date)?;
    if records.is_empty() {
        println!("No transfers logged on {}", date);
    }
    for record in records {
        println!(
            "{} {} {} -> {} | {} | {:.3} ms {} | {:.3} ms {}",
            record.timestamp.format("%H:%M:%S"),
            record.job_name,
            record.source_path.display(),
            record.target_path.display(),
            ProgressMonitor::format_bytes(record.file_size),
            record.transfer_time_ms,
            record.status.as_str(),
            record.encryption_time_ms,
            record.encryption_status.as_str()
        );
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_engine::{BackupMode, Job};
    use tempfile::TempDir;

    struct Setup {
        temp_dir: TempDir,
        config_path: PathBuf,
        config: EngineConfig,
    }

    /// Config rooted in a temp dir with two registered jobs.
    fn setup() -> Setup {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();
        let mut jobs = Vec::new();
        for name in ["Docs", "Photos"] {
            let src = root.join(name.to_lowercase());
            std::fs::create_dir_all(&src).expect("Failed to create src dir");
            std::fs::write(src.join("test.txt"), "hello").expect("Failed to write file");
            jobs.push(Job::new(name, &src, root.join("backup"), BackupMode::Full));
        }

        let config = EngineConfig::with_data_dir(root);
        std::fs::write(config.jobs_file(), serde_json::to_string(&jobs).unwrap())
            .expect("Failed to write jobs");
        let config_path = root.join("config.json");
        config.save(&config_path).expect("Failed to save config");
        Setup {
            temp_dir,
            config_path,
            config,
        }
    }

    fn run(setup: &Setup, args: &[&str]) -> anyhow::Result<i32> {
        let mut argv = vec!["backup", "--config"];
        let config_path = setup.config_path.to_string_lossy().into_owned();
        argv.push(&config_path);
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).expect("arguments should parse");
        let config = load_config(&cli).expect("config should load");
        run_cli(&cli, &config)
    }

    #[test]
    fn test_cli_list_jobs() {
        let setup = setup();
        assert_eq!(run(&setup, &["list"]).unwrap(), 0);
    }

    #[test]
    fn test_cli_run_all_jobs() {
        let setup = setup();
        assert_eq!(run(&setup, &["run", "--all"]).unwrap(), 0);

        let store = ProgressTracker::read_store(&setup.config.state_file()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.values().all(|s| s.status == ProgressStatus::Completed));
    }

    #[test]
    fn test_cli_run_parallel_selection() {
        let setup = setup();
        assert_eq!(run(&setup, &["run", "--select", "1-2", "--parallel"]).unwrap(), 0);
        let backups = std::fs::read_dir(setup.temp_dir.path().join("backup")).unwrap().count();
        assert_eq!(backups, 2);
    }

    #[test]
    fn test_cli_unknown_job_exits_with_failure() {
        let setup = setup();
        assert_eq!(run(&setup, &["run", "--jobs", "Ghost,Docs"]).unwrap(), 1);
    }

    #[test]
    fn test_cli_rejects_invalid_selection() {
        let setup = setup();
        assert!(run(&setup, &["run", "--select", "9"]).is_err());
    }

    #[test]
    fn test_cli_requires_a_selection() {
        assert!(Cli::try_parse_from(["backup", "run"]).is_err());
        assert!(Cli::try_parse_from(["backup", "run", "--all", "--select", "1"]).is_err());
    }

    #[test]
    fn test_cli_status_and_clear() {
        let setup = setup();
        run(&setup, &["run", "--jobs", "Docs"]).unwrap();

        assert_eq!(run(&setup, &["status"]).unwrap(), 0);
        assert_eq!(run(&setup, &["status", "docs"]).unwrap(), 0);
        assert!(run(&setup, &["status", "Photos"]).is_err());

        assert_eq!(run(&setup, &["clear", "Docs"]).unwrap(), 0);
        assert!(run(&setup, &["clear", "Docs"]).is_err());
        assert!(ProgressTracker::read_store(&setup.config.state_file())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_cli_log_for_today_and_other_day() {
        let setup = setup();
        run(&setup, &["run", "--jobs", "Docs"]).unwrap();
        assert_eq!(run(&setup, &["log"]).unwrap(), 0);
        assert_eq!(run(&setup, &["log", "--date", "2001-01-01"]).unwrap(), 0);
        assert!(Cli::try_parse_from(["backup", "log", "--date", "yesterday"]).is_err());
    }

    #[test]
    fn test_cli_rejects_malformed_config() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = path.to_string_lossy().into_owned();
        let cli = Cli::try_parse_from(["backup", "--config", config.as_str(), "list"]).unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_progress_rendering() {
        assert_eq!(ProgressMonitor::format_bytes(512), "512.00 B");
        assert_eq!(ProgressMonitor::format_bytes(1536), "1.50 KB");
        assert_eq!(ProgressMonitor::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(
            ProgressMonitor::print_progress_bar(50),
            format!("[{}{}] 50%", "=".repeat(10), " ".repeat(10))
        );

        let mut state = ProgressState::new("Docs");
        state.total_files = 3;
        state.total_bytes = 500;
        state.files_copied = 1;
        state.bytes_copied = 250;
        assert_eq!(ProgressMonitor::percent(&state), 50);
        assert!(ProgressMonitor::render(&state).contains("1/3 files"));
    }
}
