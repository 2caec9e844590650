use anyhow::Result;
use attendcam::events::AttendanceEvent;
use attendcam::ledger::find_ledgers;
use attendcam::{AttendanceConfig, AttendanceOrchestrator, EventFilter, EventReceiver};
use chrono::{DateTime, Local};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "attendcam")]
#[command(about = "Camera-driven QR attendance capture with spreadsheet ledger write-back")]
#[command(version)]
#[command(long_about = "Scans learner QR codes from a camera feed, checks them against the \
roster in a monthly attendance workbook, and marks today's column for every learner seen. \
Scans are deduplicated against the workbook and within the session.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "attendcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Ledger workbook to load, overriding the configured path and active folder
    #[arg(short, long, value_name = "FILE")]
    ledger: Option<PathBuf>,

    /// List workbooks in the active folder and exit
    #[arg(long)]
    list_ledgers: bool,

    /// Print today's roster status from the ledger and exit
    #[arg(long)]
    report: bool,

    /// Print the report as JSON (with --report)
    #[arg(long, requires = "report")]
    json: bool,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Scan and count without saving the ledger
    #[arg(long, help = "Run a full session but never write the ledger")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging(&args)?;

    info!("Starting attendcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match AttendanceConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if args.list_ledgers {
        list_ledgers(Path::new(&config.ledger.active_dir))?;
        return Ok(());
    }

    let mut orchestrator = AttendanceOrchestrator::new(config).map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;
    orchestrator.set_dry_run(args.dry_run);

    let console = tokio::spawn(console_sink(orchestrator.event_bus().subscribe_filtered(
        EventFilter::event_types(&[
            "ledger_loaded",
            "counters_changed",
            "scan_accepted",
            "persist_conflict",
            "camera_status_changed",
            "system_error",
        ]),
        "console",
    )));

    orchestrator
        .load_ledger(args.ledger.as_deref())
        .await
        .map_err(|e| {
            error!("Failed to load ledger: {}", e);
            e
        })?;

    if args.report {
        console.abort();
        if let Some(report) = orchestrator.report() {
            if args.json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.to_table());
            }
        }
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start session: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    if let Some(summary) = orchestrator.last_summary() {
        println!(
            "Session {}: {} scanned, present {}/{}",
            summary.session_id,
            summary.accepted.len(),
            summary.counters.present,
            summary.counters.total
        );
    }
    console.abort();

    info!("attendcam exited with code: {}", exit_code);
    drop(_log_guard);
    std::process::exit(exit_code);
}

/// Print the engine's events as plain console lines
async fn console_sink(mut events: EventReceiver) {
    while let Ok(event) = events.recv().await {
        match event {
            AttendanceEvent::LedgerLoaded {
                path,
                column,
                roster_size,
            } => match column {
                Some(column) => println!(
                    "Loaded {} ({} learners, day {} in column {})",
                    path, roster_size, column.day_of_month, column.column_index
                ),
                None => println!(
                    "Loaded {} ({} learners); today's column not found, scans will not be saved",
                    path, roster_size
                ),
            },
            AttendanceEvent::CountersChanged {
                present,
                absent,
                total,
            } => println!("Present {} | Absent {} | Total {}", present, absent, total),
            AttendanceEvent::ScanAccepted {
                identity,
                timestamp,
            } => {
                let at: DateTime<Local> = timestamp.into();
                println!("✓ {} at {}", identity, at.format("%H:%M:%S"));
            }
            AttendanceEvent::PersistConflict { identity } => println!(
                "✗ Could not save {}: the workbook is open elsewhere, close it and rescan",
                identity
            ),
            AttendanceEvent::CameraStatusChanged { connected, .. } => {
                println!("Camera {}", if connected { "connected" } else { "disconnected" })
            }
            AttendanceEvent::SystemError { component, error } => {
                eprintln!("Error in {}: {}", component, error)
            }
            _ => {}
        }
    }
}

fn list_ledgers(dir: &Path) -> Result<()> {
    let ledgers = find_ledgers(dir)?;
    if ledgers.is_empty() {
        println!("No ledger workbooks in {}", dir.display());
        return Ok(());
    }

    for info in ledgers {
        let modified = info
            .modified
            .map(|m| DateTime::<Local>::from(m).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:>10} bytes  {}",
            info.file_name, info.size_bytes, modified
        );
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("attendcam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_writer, guard) = match &args.log_file {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "attendcam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# attendcam configuration file");
    println!("# Every option is shown with its default value.");
    println!("# Any key can be overridden with ATTENDANCE__<SECTION>__<KEY>, e.g. ATTENDANCE__LEDGER__PATH");
    println!();

    let default_config = toml::to_string_pretty(&AttendanceConfig::default())?;
    println!("{}", default_config);
    Ok(())
}
