//! Dwell CLI - Command-line interface for the Dwell session tracker
//!
//! Commands:
//! - schedule: Print the resolved milestone schedule
//! - simulate: Replay a visit timeline against a virtual clock
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use dwell::config::{DEFAULT_MILESTONES, TrackerConfig};
use dwell::runtime::{DataLayer, ManualClock, ManualScheduler, PageVisibility};
use dwell::storage::{MemoryCookieJar, MemoryStore, StorageEnvironment};
use dwell::{
    MilestoneSchedule, SessionTracker, TrackerError, TrackerHost, TrackerPhase, Visibility,
    DWELL_VERSION, PRODUCER_NAME,
};

/// Wall-clock origin of simulated timelines (2023-11-14T22:13:20Z)
const SIMULATION_EPOCH_MS: i64 = 1_700_000_000_000;

/// Dwell - active session duration milestones for web pages
#[derive(Parser)]
#[command(name = "dwell")]
#[command(version = DWELL_VERSION)]
#[command(about = "Track active session duration milestones", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved milestone schedule
    Schedule {
        /// Comma-separated offsets in seconds (defaults to the built-in list)
        #[arg(short, long)]
        milestones: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay an NDJSON timeline of page events and print the emitted events
    Simulate {
        /// Timeline file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Comma-separated offsets in seconds
        #[arg(short, long)]
        milestones: Option<String>,

        /// Host name of the simulated page
        #[arg(long, default_value = "www.example.com")]
        hostname: String,

        /// Storage available to the simulated page
        #[arg(long, default_value = "cookie")]
        storage: SimulatedStorage,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SimulatedStorage {
    /// Cookies only
    Cookie,
    /// Cross-session store only (localStorage)
    Local,
    /// Per-tab store only (sessionStorage)
    Session,
    /// Every backend blocked
    None,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Action {
    Tick,
    Hidden,
    Visible,
    Reload,
}

/// One line of a simulation timeline
#[derive(Debug, Deserialize)]
struct Step {
    /// Offset from the first page load
    at_ms: u64,
    action: Action,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("DWELL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), DwellCliError> {
    match cli.command {
        Commands::Schedule { milestones, json } => cmd_schedule(milestones.as_deref(), json),
        Commands::Simulate {
            input,
            milestones,
            hostname,
            storage,
        } => cmd_simulate(&input, milestones.as_deref(), &hostname, storage),
        Commands::Doctor { json } => cmd_doctor(json),
    }
}

fn config_for(milestones: Option<&str>) -> TrackerConfig {
    match milestones {
        Some(raw) => TrackerConfig::default().with_milestones(raw),
        None => TrackerConfig::default(),
    }
}

fn cmd_schedule(milestones: Option<&str>, json: bool) -> Result<(), DwellCliError> {
    let config = config_for(milestones);
    let schedule = MilestoneSchedule::parse(config.milestones.as_deref(), &config.fallback_milestones)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&schedule)?);
        return Ok(());
    }

    if config.milestones.is_none() {
        println!("Using built-in schedule");
    }
    println!("{:>8}  {:<14}  {:<22}  {}", "OFFSET", "LABEL", "VARIABLE", "VALUE");
    for m in schedule.iter() {
        println!(
            "{:>7}s  {:<14}  {:<22}  {}",
            m.seconds, m.label, m.reporting_variable, m.reporting_value
        );
    }
    Ok(())
}

/// Storage shared by every page load of a simulation
struct SimulatedBrowser {
    hostname: String,
    kind: SimulatedStorage,
    cookies: MemoryCookieJar,
    store: MemoryStore,
}

impl SimulatedBrowser {
    fn new(hostname: &str, kind: SimulatedStorage) -> Self {
        Self {
            hostname: hostname.to_string(),
            kind,
            cookies: MemoryCookieJar::new(hostname),
            store: MemoryStore::new(),
        }
    }

    fn environment(&self) -> StorageEnvironment {
        let env = StorageEnvironment::new(&self.hostname);
        match self.kind {
            SimulatedStorage::Cookie => env.with_cookies(self.cookies.for_host(&self.hostname)),
            SimulatedStorage::Local => env.with_cross_session(self.store.clone()),
            SimulatedStorage::Session => env.with_per_tab(self.store.clone()),
            SimulatedStorage::None => env,
        }
    }
}

/// A single page load: its own timer and visibility, the browser's clock and storage.
struct SimulatedPage {
    tracker: SessionTracker,
    visibility: PageVisibility,
}

impl SimulatedPage {
    fn load(
        config: &TrackerConfig,
        browser: &SimulatedBrowser,
        clock: &ManualClock,
        layer: &DataLayer,
    ) -> Self {
        let visibility = PageVisibility::default();
        let host = TrackerHost {
            clock: Box::new(clock.clone()),
            scheduler: Box::new(ManualScheduler::new()),
            visibility: Box::new(visibility.clone()),
            sink: Box::new(layer.clone()),
            storage: browser.environment(),
        };
        let mut tracker = SessionTracker::new(config.clone(), host);
        tracker.start();
        Self { tracker, visibility }
    }

    fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility.set(visibility);
        self.tracker.handle_visibility_change(visibility);
    }
}

fn cmd_simulate(
    input: &Path,
    milestones: Option<&str>,
    hostname: &str,
    storage: SimulatedStorage,
) -> Result<(), DwellCliError> {
    let steps = read_timeline(input)?;
    let config = config_for(milestones);

    let clock = ManualClock::new(SIMULATION_EPOCH_MS);
    let layer = DataLayer::new();
    let browser = SimulatedBrowser::new(hostname, storage);

    let mut stdout = io::stdout();
    let mut page = SimulatedPage::load(&config, &browser, &clock, &layer);
    write_events(&mut stdout, &layer)?;

    let mut last_at = 0;
    for (index, step) in steps.iter().enumerate() {
        if step.at_ms < last_at {
            return Err(DwellCliError::Timeline(format!(
                "step {} goes back in time ({} ms after {} ms)",
                index + 1,
                step.at_ms,
                last_at
            )));
        }
        clock.advance(Duration::from_millis(step.at_ms - last_at));
        last_at = step.at_ms;

        match step.action {
            Action::Tick => page.tracker.tick(),
            Action::Hidden => page.set_visibility(Visibility::Hidden),
            Action::Visible => page.set_visibility(Visibility::Visible),
            Action::Reload => {
                page.tracker.shutdown();
                page = SimulatedPage::load(&config, &browser, &clock, &layer);
            }
        }
        write_events(&mut stdout, &layer)?;
    }

    if page.tracker.phase() == TrackerPhase::Disabled {
        tracing::info!(reason = ?page.tracker.disable_reason(), "tracker disabled during simulation");
    }
    page.tracker.shutdown();
    stdout.flush()?;
    Ok(())
}

fn read_timeline(input: &Path) -> Result<Vec<Step>, DwellCliError> {
    let reader: Box<dyn BufRead> = if input.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Box::new(io::Cursor::new(buffer))
    } else {
        Box::new(BufReader::new(fs::File::open(input)?))
    };

    let mut steps = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let step: Step = serde_json::from_str(trimmed).map_err(|e| {
            DwellCliError::ParseError(format!("Failed to parse step on line {}: {}", index + 1, e))
        })?;
        steps.push(step);
    }
    Ok(steps)
}

fn write_events(out: &mut impl Write, layer: &DataLayer) -> Result<(), DwellCliError> {
    for event in layer.drain() {
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
    }
    Ok(())
}

fn cmd_doctor(json: bool) -> Result<(), DwellCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "dwell_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Dwell version {}", DWELL_VERSION),
    });

    match MilestoneSchedule::parse(None, DEFAULT_MILESTONES) {
        Ok(schedule) => checks.push(DoctorCheck {
            name: "default_schedule".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{} milestones up to {}",
                schedule.len(),
                schedule.iter().last().map_or("none", |m| m.label.as_str())
            ),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "default_schedule".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    let log_filter = std::env::var("DWELL_LOG").unwrap_or_else(|_| "warn (default)".to_string());
    checks.push(DoctorCheck {
        name: "log_filter".to_string(),
        status: CheckStatus::Ok,
        message: format!("DWELL_LOG={}", log_filter),
    });

    // Check stdin is available (for `simulate --input -`)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Warning,
            message: "stdin is a TTY (pipe a timeline to use --input -)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (timeline input ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: DWELL_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Dwell Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(DwellCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum DwellCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Tracker(TrackerError),
    ParseError(String),
    Timeline(String),
    DoctorFailed,
}

impl From<io::Error> for DwellCliError {
    fn from(e: io::Error) -> Self {
        DwellCliError::Io(e)
    }
}

impl From<serde_json::Error> for DwellCliError {
    fn from(e: serde_json::Error) -> Self {
        DwellCliError::Json(e)
    }
}

impl From<TrackerError> for DwellCliError {
    fn from(e: TrackerError) -> Self {
        DwellCliError::Tracker(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<DwellCliError> for CliError {
    fn from(e: DwellCliError) -> Self {
        match e {
            DwellCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            DwellCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            DwellCliError::Tracker(TrackerError::EmptySchedule) => CliError {
                code: "EMPTY_SCHEDULE".to_string(),
                message: TrackerError::EmptySchedule.to_string(),
                hint: Some("Pass non-negative whole seconds, e.g. --milestones 0,30,60".to_string()),
            },
            DwellCliError::Tracker(e) => CliError {
                code: "TRACKER_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            DwellCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some(r#"Each line must look like {"at_ms": 1000, "action": "tick"}"#.to_string()),
            },
            DwellCliError::Timeline(msg) => CliError {
                code: "TIMELINE_ERROR".to_string(),
                message: msg,
                hint: Some("Order timeline steps by at_ms".to_string()),
            },
            DwellCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
