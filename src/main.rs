#![forbid(unsafe_code)]

//! `mph-session`: start a COMSOL server session from the command line.
//!
//! Starts the server for the configured engine version, connects to it
//! and, depending on the subcommand, attaches a desktop front-end or lists
//! the models on the server. The session is shut down on every exit path.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mph_session::config::{LogFormat, LoggingConfig};
use mph_session::{AppError, Result, Session, SessionConfig, SessionDeps};

#[derive(Debug, Parser)]
#[command(name = "mph-session", about = "COMSOL client/server session", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine version to start, e.g. 5.3.
    #[arg(long)]
    version_string: Option<String>,

    /// Front-end attachment timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Regenerate the remote type bindings before use.
    #[arg(long)]
    rebuild: bool,

    /// Log at debug level and trace every remote call.
    #[arg(long)]
    debug: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the server and hold the session until interrupted.
    Serve,
    /// Start the server, attach a desktop front-end and hold until
    /// interrupted.
    Launch {
        /// Model file to open in the front-end.
        file: Option<PathBuf>,
    },
    /// Start the server, print the model tags on it and exit.
    Tags,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging)?;
    info!(version = %config.version, "mph-session bootstrap");

    // Remote calls are strictly sequential; one thread is enough.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args.command, config))
}

fn load_config(args: &Cli) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_path(path)?,
        None => SessionConfig::default(),
    };

    if let Some(version) = &args.version_string {
        config.version.clone_from(version);
    }
    if let Some(timeout) = args.timeout {
        config.timeout_seconds = timeout;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    config.rebuild |= args.rebuild;
    config.logging.debug |= args.debug;

    config.validate()?;
    Ok(config)
}

async fn run(command: Command, config: SessionConfig) -> Result<()> {
    let deps = SessionDeps::system(&config);
    let mut session = Session::start(config, deps).await?;
    info!(
        port = session.port().unwrap_or(0),
        version = session.version(),
        "session ready"
    );

    let outcome = execute(&mut session, command).await;

    if let Err(err) = session.shutdown().await {
        error!(%err, "session shutdown failed");
        outcome?;
        return Err(err);
    }
    outcome
}

async fn execute(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Serve => {
            let signal = shutdown_signal().await;
            info!(signal, "shutdown signal received");
        }
        Command::Launch { file } => {
            let model = session.launch(file.as_deref()).await?;
            info!(tag = model.tag(), "front-end attached");
            let signal = shutdown_signal().await;
            info!(signal, "shutdown signal received");
        }
        Command::Tags => {
            for tag in session.mu()?.tags().await? {
                println!("{tag}");
            }
        }
    }
    Ok(())
}

/// Wait for ctrl-c or, on unix, SIGTERM and return the signal's name.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                return tokio::select! {
                    _ = tokio::signal::ctrl_c() => "ctrl-c",
                    _ = sigterm.recv() => "SIGTERM",
                };
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
            }
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "ctrl-c handler failed, shutting down");
    }
    "ctrl-c"
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let default_level = if logging.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
