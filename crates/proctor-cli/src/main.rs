//! Proctor CLI
//!
//! Runs the exam server with its streaming relay, or attaches to the relay as
//! an observer.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use proctor_client::{ObserverClient, CALLER_HEADER};
use proctor_model::{SessionId, StreamMessage};
use proctor_server::{
    create_router, spawn_expiry_sweeper, AppState, Config, FileGradingSink, StaticCatalog,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// Proctor - Proctored Assessment Session Engine
///
/// Serves timed exam sessions under integrity constraints and relays a live
/// view of each candidate's screen to remote observers.
#[derive(Parser, Debug)]
#[command(name = "proctor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the exam server and streaming relay
    Serve {
        /// Path to configuration file (default: proctor.json in current directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,

        /// Exam catalog file (overrides examsFile)
        #[arg(short, long, value_name = "FILE")]
        exams: Option<String>,

        /// Directory for finalized submissions (overrides submissionsDir)
        #[arg(short, long, value_name = "DIR")]
        submissions_dir: Option<String>,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port for the HTTP API server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Watch a session's live frames as an observer
    Watch {
        /// Session to watch
        #[arg(value_name = "SESSION")]
        session: String,

        /// Relay base URL
        #[arg(long, default_value = "ws://127.0.0.1:3000")]
        url: String,

        /// Observer identity sent to the relay
        #[arg(long, default_value = "observer")]
        observer: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match args.command {
        Command::Serve {
            config,
            exams,
            submissions_dir,
            host,
            port,
        } => {
            run_server(ServeOptions {
                config,
                exams,
                submissions_dir,
                addr: SocketAddr::new(host, port),
            })
            .await
        }
        Command::Watch {
            session,
            url,
            observer,
        } => run_observer(&session, &url, &observer).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

struct ServeOptions {
    config: Option<String>,
    exams: Option<String>,
    submissions_dir: Option<String>,
    addr: SocketAddr,
}

/// Runs the server until Ctrl+C.
async fn run_server(options: ServeOptions) -> anyhow::Result<()> {
    let mut config = load_config(options.config.as_deref())?;

    if let Some(ref exams) = options.exams {
        config.exams_file.clone_from(exams);
    }
    if let Some(ref dir) = options.submissions_dir {
        config.submissions_dir.clone_from(dir);
    }

    // Re-validate after overrides
    config.validate()?;
    print_config(&config);

    let catalog = StaticCatalog::load_from_file(Path::new(&config.exams_file))?;
    println!("  Exams loaded: {}", catalog.len());

    tokio::fs::create_dir_all(&config.submissions_dir)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to create submissions directory: {e}\n\nPath: {}",
                config.submissions_dir
            )
        })?;
    let grading = FileGradingSink::new(&config.submissions_dir);

    let state = AppState::new(config, Arc::new(catalog), Arc::new(grading));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_expiry_sweeper(&state, shutdown_rx);
    let router = create_router(state);

    let addr = options.addr;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port")
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Relay endpoint: ws://{addr}/ws (identity via ?caller= or {CALLER_HEADER})");
    println!("Press Ctrl+C to stop");
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    shutdown_tx.send_replace(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Expiry sweeper ended abnormally");
    }
    println!("Server stopped");
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Exams file: {}", config.exams_file);
    println!("  Submissions directory: {}", config.submissions_dir);
    println!("  Submit grace: {}s", config.submit_grace_seconds);
    println!("  Expiry sweep: every {}s", config.expiry_sweep_seconds);
    println!("  Max frame size: {} bytes", config.relay.max_frame_bytes);
}

/// Subscribes to a session and prints relay events until Ctrl+C.
async fn run_observer(session: &str, base_url: &str, observer: &str) -> anyhow::Result<()> {
    let url = format!("{}/ws?caller={observer}", base_url.trim_end_matches('/'));
    let session_id = SessionId::from(session);

    let mut client = ObserverClient::connect(&url).await.map_err(|e| {
        anyhow::anyhow!("{e}\n\nSuggestion: Check that the server is running at {base_url}")
    })?;
    client.watch(&session_id).await?;
    println!("Watching session {session_id} (Ctrl+C to stop)");

    let mut frames = 0u64;
    loop {
        tokio::select! {
            event = client.next_event() => {
                match event? {
                    Some(StreamMessage::Frame(frame)) => {
                        frames += 1;
                        tracing::debug!(
                            timestamp = frame.timestamp,
                            bytes = frame.image_data.len(),
                            "Frame received"
                        );
                        if frames % 50 == 1 {
                            println!("  frames received: {frames}");
                        }
                    }
                    Some(StreamMessage::StreamingStarted(payload)) => {
                        println!("Streaming started by {}", payload.candidate_id);
                    }
                    Some(StreamMessage::StreamingStopped(_)) => {
                        println!("Streaming stopped");
                    }
                    Some(StreamMessage::Error(payload)) => {
                        println!("Relay error: {}", payload.message);
                    }
                    Some(other) => {
                        tracing::debug!(event = other.event_name(), "Ignoring relay event");
                    }
                    None => {
                        println!("Relay closed the connection");
                        break;
                    }
                }
            }
            Ok(()) = tokio::signal::ctrl_c() => {
                client.unwatch(&session_id).await?;
                break;
            }
        }
    }

    println!("Received {frames} frames");
    client.close().await?;
    Ok(())
}
