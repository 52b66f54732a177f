use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aime_realtime::EngineConfig;
use aime_realtime::core::tools::ToolName;

/// Aime realtime - voice caddie session engine
#[derive(Parser, Debug)]
#[command(name = "aime-realtime")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive session. Lines typed on stdin are sent as user text;
    /// /interrupt, /clear, /stop, /start and /quit are commands.
    Run,

    /// Print the resolved configuration
    Config,

    /// Run a single tool and print its output payload
    Tool {
        /// Tool name (get_current_weather, display_hole_layout, solve_putt)
        name: String,

        /// Tool arguments as a JSON object
        arguments: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Logs go to stderr so session output on stdout stays readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        eprintln!("Loading configuration from {}", config_path.display());
        EngineConfig::from_file(&config_path)?
    } else {
        EngineConfig::from_env()?
    };

    match cli.command {
        Commands::Config => {
            for (key, value) in config.summary() {
                println!("{key}: {value}");
            }
            Ok(())
        }
        Commands::Tool { name, arguments } => run_tool(&config, &name, &arguments).await,
        Commands::Run => run_session(config).await,
    }
}

async fn run_tool(config: &EngineConfig, name: &str, arguments: &str) -> anyhow::Result<()> {
    let tool = ToolName::parse(name).ok_or_else(|| {
        let known: Vec<&str> = ToolName::all().iter().map(|t| t.as_str()).collect();
        anyhow!("Unknown tool '{}'. Known tools: {}", name, known.join(", "))
    })?;
    let backends = config.tool_backends()?;

    let (output, resolution) = backends.run(tool, arguments).await;
    eprintln!("{tool}: {resolution:?}");
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(not(feature = "webrtc"))]
async fn run_session(_config: EngineConfig) -> anyhow::Result<()> {
    anyhow::bail!("The run command requires the `webrtc` feature (cargo build --features webrtc)")
}

#[cfg(feature = "webrtc")]
async fn run_session(config: EngineConfig) -> anyhow::Result<()> {
    use std::io::Write;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tracing::{info, warn};

    use aime_realtime::core::realtime::webrtc::{StaticSampleCapture, WebRtcTransportFactory};
    use aime_realtime::core::realtime::{ConnectionState, RealtimeSession, SessionDeps};

    let tools = config.tool_backends()?;
    let deps = SessionDeps::new(
        Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone())),
        Arc::new(StaticSampleCapture::new()),
    );
    let session = RealtimeSession::spawn(config.realtime_config(), tools, deps)?;
    info!(session_id = session.id(), "Session created");

    let mut status = session.subscribe_status();
    let last_error = session.subscribe_error();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = *status.borrow_and_update();
            match last_error.borrow().clone() {
                Some(err) if state == ConnectionState::Error => eprintln!("[{state}] {err}"),
                _ => eprintln!("[{state}]"),
            }
        }
    });

    let mut display = session.subscribe_display();
    tokio::spawn(async move {
        let mut shown = String::new();
        while display.changed().await.is_ok() {
            let current = display.borrow_and_update().clone();
            let mut stdout = std::io::stdout();
            if !current.visible || current.text.is_empty() {
                if !shown.is_empty() {
                    let _ = writeln!(stdout);
                    shown.clear();
                }
                continue;
            }
            match current.text.strip_prefix(shown.as_str()) {
                Some(suffix) if !shown.is_empty() => {
                    let _ = write!(stdout, "{suffix}");
                }
                _ => {
                    if !shown.is_empty() {
                        let _ = writeln!(stdout);
                    }
                    let _ = write!(stdout, "Aime: {}", current.text);
                }
            }
            let _ = stdout.flush();
            shown = current.text;
        }
    });

    session.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => {}
                    "/quit" => break,
                    "/start" => {
                        if !session.start().await? {
                            eprintln!("Session already {}", session.status());
                        }
                    }
                    "/stop" => session.stop().await?,
                    "/interrupt" => {
                        session.interrupt().await?;
                    }
                    "/clear" => {
                        session.clear_audio_buffer().await?;
                    }
                    text => {
                        if let Err(e) = session.send_text(text).await {
                            warn!(error = %e, "Message not sent");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    session.shutdown().await?;
    Ok(())
}
