//! vocab-sync CLI - mirror tables between the vocabulary databases.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use vocab_sync::progress::run_worker;
use vocab_sync::{
    ConnectionManager, DependencyOrderer, Direction, JobStatus, ProgressEvent, SchemaIntrospector,
    SyncConfig, SyncError, SyncJob, WorkerHandle, WorkerRequest,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "vocab-sync")]
#[command(about = "Mirror tables between the vocabulary server and local databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output events and results as JSON
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds to wait for a cancelled sync to stop before killing it
    #[arg(long, default_value = "10")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync job in an isolated child process
    Run {
        /// server-to-local, local-to-server, server-to-secondary or secondary-to-server
        #[arg(short, long, value_parser = parse_direction)]
        direction: Direction,

        /// Comma-separated tables to sync (default: every common table)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Compare row counts between the two sides of a direction
    Compare {
        /// server-to-local, local-to-server, server-to-secondary or secondary-to-server
        #[arg(short, long, value_parser = parse_direction)]
        direction: Direction,

        /// Comma-separated tables to compare (default: every common table)
        #[arg(short, long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Test database connections
    HealthCheck,

    /// Worker entry point: reads a job on stdin, writes events on stdout
    #[command(hide = true)]
    Worker,
}

fn parse_direction(s: &str) -> Result<Direction, String> {
    Direction::parse(s).ok_or_else(|| {
        let names: Vec<&str> = Direction::ALL.iter().map(|d| d.as_str()).collect();
        format!("unknown direction '{}' (expected one of: {})", s, names.join(", "))
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, SyncError> {
    let cli = Cli::parse();

    // Logs always go to stderr: a worker's stdout carries the event stream.
    setup_logging(&cli.verbosity, &cli.log_format);

    match cli.command {
        Commands::Worker => {
            let cancel = setup_signal_handler(cli.shutdown_timeout).await?;
            let status = run_worker(cancel).await?;
            // The stdin watcher can be parked in a blocking read that would
            // hold up runtime shutdown.
            std::process::exit(match status {
                JobStatus::Fatal => 1,
                JobStatus::Completed | JobStatus::CompletedWithErrors => 0,
            });
        }

        Commands::Run { direction, tables } => {
            let config = SyncConfig::load(&cli.config)?;
            info!("Loaded configuration from {:?}", cli.config);

            let request = WorkerRequest {
                config,
                job: SyncJob::new(direction, tables),
            };

            let mut command = Command::new(std::env::current_exe()?);
            command
                .arg("--verbosity")
                .arg(&cli.verbosity)
                .arg("--log-format")
                .arg(&cli.log_format)
                .arg("worker");

            let cancel = setup_signal_handler(cli.shutdown_timeout).await?;
            let mut worker = WorkerHandle::spawn(command, &request).await?;

            let output_json = cli.output_json;
            let mut outcome: Option<ProgressEvent> = None;
            let status = worker
                .drive(
                    &cancel,
                    Duration::from_secs(cli.shutdown_timeout),
                    |event| {
                        print_event(event, output_json);
                        if event.is_terminal() {
                            outcome = Some(event.clone());
                        }
                    },
                )
                .await?;
            info!("Worker finished: {}", status);

            match outcome {
                Some(ProgressEvent::FatalError { message }) => Err(SyncError::Worker(message)),
                _ => Ok(ExitCode::SUCCESS),
            }
        }

        Commands::Compare { direction, tables } => {
            let config = SyncConfig::load(&cli.config)?;
            let orderer = DependencyOrderer::from_settings(config.sync.precedence.as_deref());
            let manager = ConnectionManager::new(config);
            let result = compare(&manager, &orderer, direction, tables, cli.output_json).await;
            manager.close_all().await;
            result?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::HealthCheck => {
            let config = SyncConfig::load(&cli.config)?;
            let manager = ConnectionManager::new(config);
            let results = manager.test_all().await;
            manager.close_all().await;

            if cli.output_json {
                let map: serde_json::Map<String, serde_json::Value> = results
                    .iter()
                    .map(|(role, ok)| (role.to_string(), serde_json::Value::Bool(*ok)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                println!("Health Check Results:");
                for (role, ok) in &results {
                    println!("  {}: {}", role, if *ok { "OK" } else { "FAILED" });
                }
            }

            if results.values().all(|ok| *ok) {
                Ok(ExitCode::SUCCESS)
            } else {
                Err(SyncError::Config("Health check failed".to_string()))
            }
        }
    }
}

/// Read-only row count comparison over the caller's own connections.
async fn compare(
    manager: &ConnectionManager,
    orderer: &DependencyOrderer,
    direction: Direction,
    tables: Vec<String>,
    output_json: bool,
) -> Result<(), SyncError> {
    let (source, target) = direction.roles();
    let introspector = SchemaIntrospector::new(manager);
    let mut common = introspector.common_tables(source, target).await?;
    if !tables.is_empty() {
        common.retain(|t| tables.contains(t));
    }

    let mut rows = Vec::new();
    for table in orderer.insertion_order(&common) {
        let source_count = manager.row_count(source, &table).await?;
        let target_count = manager.row_count(target, &table).await?;
        rows.push((table, source_count, target_count));
    }

    if output_json {
        let value: Vec<serde_json::Value> = rows
            .iter()
            .map(|(table, s, t)| {
                serde_json::json!({
                    "table": table,
                    "source": s,
                    "target": t,
                    "match": s == t,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let width = rows.iter().map(|(t, _, _)| t.len()).max().unwrap_or(5).max(5);
    println!(
        "{:<width$}  {:>10}  {:>10}",
        "table",
        source.to_string(),
        target.to_string(),
        width = width
    );
    for (table, s, t) in &rows {
        let marker = if s == t { "" } else { "  differs" };
        println!("{:<width$}  {:>10}  {:>10}{}", table, s, t, marker, width = width);
    }
    Ok(())
}

fn print_event(event: &ProgressEvent, output_json: bool) {
    if output_json {
        match event.to_json_line() {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Could not serialize event: {}", e),
        }
        return;
    }
    if !matches!(event, ProgressEvent::ProgressPercent { .. }) {
        println!("{}", event);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, SyncError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        if sigint.recv().await.is_some() {
            eprintln!(
                "\nReceived SIGINT. Shutting down gracefully (timeout: {}s)...",
                shutdown_timeout
            );
            token_int.cancel();
        }
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        if sigterm.recv().await.is_some() {
            eprintln!(
                "\nReceived SIGTERM. Shutting down gracefully (timeout: {}s)...",
                shutdown_timeout
            );
            token_term.cancel();
        }
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(_shutdown_timeout: u64) -> Result<CancellationToken, SyncError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
