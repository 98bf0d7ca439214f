use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{debug, error, info};
use tokio::net::TcpListener;

use voxbridge::api::{self, AppState};
use voxbridge::config::{self, AppConfig};
use voxbridge::history::HistoryStore;
use voxbridge::session::SessionManager;
use voxbridge::ws::hub::WsHub;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Voxbridge - voice relay for a command-line AI assistant.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Output machine readable JSON logs
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in log output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the relay server
    Serve(ServeCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Working directory for the assistant subprocess
    #[arg(long, value_name = "PATH")]
    working_dir: Option<PathBuf>,
    /// Assistant CLI binary
    #[arg(long, value_name = "BIN")]
    agent_bin: Option<PathBuf>,
    /// Directory of static UI assets
    #[arg(long, value_name = "PATH")]
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config_file = cli
        .common
        .config
        .clone()
        .unwrap_or_else(config::default_config_file);

    match cli.command {
        Command::Serve(cmd) => {
            let mut cfg = config::load_or_init(&config_file)?;
            apply_overrides(&mut cfg, &cmd);
            init_logging(&cli.common, &cfg);
            debug!("effective config: {cfg:#?}");
            serve(cfg)
        }
        Command::Config { command } => {
            let cfg = config::load(&config_file)?;
            match command {
                ConfigCommand::Show => {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
                ConfigCommand::Path => {
                    println!("{}", config_file.display());
                }
            }
            Ok(())
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn apply_overrides(cfg: &mut AppConfig, cmd: &ServeCommand) {
    if let Some(ref host) = cmd.host {
        cfg.server.host = host.clone();
    }
    if let Some(port) = cmd.port {
        cfg.server.port = port;
    }
    if let Some(ref dir) = cmd.working_dir {
        cfg.agent.working_dir = dir.clone();
    }
    if let Some(ref bin) = cmd.agent_bin {
        cfg.agent.binary = bin.clone();
    }
    if let Some(ref dir) = cmd.static_dir {
        cfg.ui.static_dir = Some(dir.clone());
    }
}

fn init_logging(common: &CommonOpts, cfg: &AppConfig) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = if common.quiet {
        "error"
    } else {
        match common.verbose {
            0 => cfg.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("voxbridge={level},tower_http={level}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        let disable_color = common.no_color
            || std::env::var_os("NO_COLOR").is_some()
            || !io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn serve(cfg: AppConfig) -> Result<()> {
    let history = Arc::new(HistoryStore::new());
    let hub = Arc::new(WsHub::new());
    let session = SessionManager::new(cfg.agent.clone(), Arc::clone(&history), Arc::clone(&hub));

    let state = AppState {
        session: Arc::clone(&session),
        history,
        hub,
    };
    let app = api::router(state, &cfg);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("voxbridge listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(session))
        .await
        .context("server error")?;
    Ok(())
}

/// Resolves when the process receives ctrl-c; tears the session down so the
/// assistant subprocess never outlives the server.
async fn shutdown_signal(session: Arc<SessionManager>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown signal received, stopping session");
    session.stop().await;
}
