//! shellport — session transport client CLI.
//!
//! Opens the persistent bidirectional transport used by interactive remote
//! sessions and reports its connectivity and session readiness.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing::error;

/// shellport — session transport client
#[derive(Parser)]
#[command(name = "shellport", version, about = "Open and watch a remote session transport")]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not send credentials with the handshake
    #[arg(long, global = true)]
    no_credentials: bool,

    /// Cookie sent with the handshake
    #[arg(long, global = true)]
    cookie: Option<String>,

    /// Maximum automatic reconnection tries
    #[arg(long, global = true)]
    reconnection_attempts: Option<u32>,

    /// Connection timeout in milliseconds
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and report state changes until Ctrl-C
    Watch {
        /// Session-transport service URL (http, https, ws or wss)
        endpoint: Option<String>,
    },

    /// Check that the endpoint accepts a transport connection
    Probe {
        /// Session-transport service URL (http, https, ws or wss)
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                "shellport=debug,shellport_cli=debug,shellport_client=debug,shellport_core=debug",
            )
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("shellport=warn,shellport_cli=warn")
            .with_target(false)
            .init();
    }

    // Load config file.
    let config_path = cli.config.clone().unwrap_or_else(|| {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".shellport").join("config.toml").to_string_lossy().to_string()
    });
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("shellport: {e:#}");
            std::process::exit(1);
        }
    };

    // CLI flags override config values.
    let mut options = cfg.connection.to_options();
    if cli.no_credentials {
        options.with_credentials = false;
    }
    if let Some(cookie) = cli.cookie.clone() {
        options.cookie = Some(cookie);
    }
    if let Some(attempts) = cli.reconnection_attempts {
        options.reconnection_attempts = attempts;
    }
    if let Some(ms) = cli.timeout_ms {
        options.connect_timeout = std::time::Duration::from_millis(ms);
    }

    let result = match cli.command {
        Command::Watch { endpoint } => {
            let endpoint = cfg.resolve_endpoint(endpoint.as_deref());
            commands::watch::run(&endpoint, options).await
        }
        Command::Probe { endpoint } => {
            let endpoint = cfg.resolve_endpoint(endpoint.as_deref());
            commands::probe::run(&endpoint, options).await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("shellport: {e:#}");
        std::process::exit(1);
    }
}
