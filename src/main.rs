use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livedetect::app::{open_registry, LiveDetectOrchestrator};
use livedetect::control::{LaunchKind, Launcher, SystemLauncher};
use livedetect::{LiveDetectConfig, LiveDetectError, SessionId};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "livedetect")]
#[command(about = "Live object detection recorder with managed recording sessions")]
#[command(version)]
#[command(long_about = "Pulls frames from a live source, runs them through an object detection \
model, and records annotated video together with a per-detection event log. Sessions are \
started, stopped, listed, played and deleted from the terminal or over HTTP.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "livedetect.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the keyboard and HTTP control surfaces (default)
    Run,
    /// Record a single session, then exit
    Record {
        /// Stop after this many seconds; otherwise run until the source ends or Ctrl+C
        #[arg(long)]
        duration: Option<u64>,
    },
    /// List recorded sessions, newest first
    List,
    /// Delete a recorded session's video, log and metadata
    Delete { id: String },
    /// Open a session's video in the configured player
    Play { id: String },
    /// Open a session's event log in the configured viewer
    Log { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let guard = init_logging(&args)?;

    info!("Starting livedetect v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match LiveDetectConfig::load_from_file(&args.config) {
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
                drop(guard);
                std::process::exit(1);
            }
        }
    }

    let exit_code = match args.command.unwrap_or(Command::Run) {
        Command::Run => serve(config).await?,
        Command::Record { duration } => {
            record(config, duration.map(Duration::from_secs)).await?;
            0
        }
        Command::List => {
            list(&config)?;
            0
        }
        Command::Delete { id } => {
            let id = SessionId::parse(&id)?;
            open_registry(&config.recording)?.delete(&id)?;
            println!("Deleted {}", id);
            0
        }
        Command::Play { id } => {
            launch(&config, &id, LaunchKind::Video)?;
            0
        }
        Command::Log { id } => {
            launch(&config, &id, LaunchKind::Log)?;
            0
        }
    };

    info!("livedetect exited with code: {}", exit_code);
    drop(guard);
    std::process::exit(exit_code);
}

async fn serve(config: LiveDetectConfig) -> Result<i32> {
    let mut orchestrator = LiveDetectOrchestrator::new(config).map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start control surfaces: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;
    Ok(exit_code)
}

async fn record(mut config: LiveDetectConfig, duration: Option<Duration>) -> Result<()> {
    config.control.keyboard = false;

    let mut orchestrator = LiveDetectOrchestrator::new(config)?;
    orchestrator.start().await?;
    let entry = orchestrator.record(duration).await?;

    match &entry.metadata {
        Some(metadata) => println!(
            "{} {:?}: {} frames, {} detections",
            entry.id, metadata.status, metadata.frames_recorded, metadata.detections_logged
        ),
        None => println!("{}", entry.id),
    }
    if let Some(video) = &entry.video_path {
        println!("  video: {}", video.display());
    }
    if let Some(log) = &entry.log_path {
        println!("  log:   {}", log.display());
    }

    if entry.is_failed() {
        let reason = entry
            .metadata
            .and_then(|m| m.failure)
            .unwrap_or_else(|| "unknown failure".to_string());
        anyhow::bail!("session {} failed: {}", entry.id, reason);
    }
    Ok(())
}

fn list(config: &LiveDetectConfig) -> Result<()> {
    let entries = open_registry(&config.recording)?.list()?;
    if entries.is_empty() {
        println!("No recorded sessions in {}", config.recording.root.display());
        return Ok(());
    }

    for entry in entries {
        let (frames, detections) = entry
            .metadata
            .as_ref()
            .map(|m| (m.frames_recorded.to_string(), m.detections_logged.to_string()))
            .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
        println!(
            "{:<36} {}  {:>8} frames {:>8} detections{}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            frames,
            detections,
            if entry.is_failed() { "  FAILED" } else { "" }
        );
    }
    Ok(())
}

fn launch(config: &LiveDetectConfig, raw_id: &str, kind: LaunchKind) -> Result<()> {
    let id = SessionId::parse(raw_id)?;
    let entry = open_registry(&config.recording)?.get(&id)?;
    let path = match kind {
        LaunchKind::Video => entry.video_path,
        LaunchKind::Log => entry.log_path,
    }
    .ok_or_else(|| LiveDetectError::NotFound {
        session_id: id.to_string(),
    })?;

    SystemLauncher::from_config(&config.control).launch(kind, &path)?;
    println!("Opened {}", path.display());
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("livedetect={}", log_level)));

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

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("--log-file {} has no file name", path.display()))?;
            std::fs::create_dir_all(&directory)
                .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

            let appender = tracing_appender::rolling::never(&directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# livedetect configuration file");
    println!("# Every key is optional; environment variables such as");
    println!("# LIVEDETECT_STREAM__PORT=9000 override the file.");
    println!();
    let rendered = toml::to_string_pretty(&LiveDetectConfig::default())
        .context("Failed to render default configuration")?;
    println!("{}", rendered);
    Ok(())
}
