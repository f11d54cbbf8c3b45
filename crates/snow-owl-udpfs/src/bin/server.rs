//! UDP file server binary
//!
//! Run with: cargo run --bin snow-owl-udpfs-server -- --root-dir /srv/files

use anyhow::Context;
use clap::Parser;
use snow_owl_udpfs::config::{load_config, validate_config, write_config};
use snow_owl_udpfs::{LogFormat, Server, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snow-owl-udpfs-server", about = "UDP file server", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "/etc/snow-owl/udpfs.toml")]
    config: PathBuf,

    /// Write the effective configuration to --config and exit
    #[arg(long)]
    init_config: bool,

    /// Validate the configuration and exit (no socket bind)
    #[arg(long)]
    check_config: bool,

    /// Create the root directory if it does not exist
    #[arg(long)]
    create_root_dir: bool,

    /// Sandbox directory to serve files from
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_connections: Option<usize>,

    /// Seconds of silence before a session is evicted
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Shared secret for LOGIN_ADMIN
    #[arg(long)]
    admin_secret: Option<String>,

    /// Log format (json or text)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(config: &ServerConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::new(config.logging.level.clone());

    let Some(ref log_file) = config.logging.file else {
        match config.logging.format {
            LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter()).init(),
            LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter()).init(),
        }
        return Ok(None);
    };

    let dir = log_file.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file_name = log_file
        .file_name()
        .and_then(|name| name.to_str())
        .context("logging.file must include a file name")?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(non_blocking)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(non_blocking)
            .with_ansi(false)
            .init(),
    }

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        ServerConfig::default()
    };

    if let Some(root_dir) = cli.root_dir {
        config.root_dir = root_dir;
    }
    if let Some(bind_addr) = cli.bind {
        config.bind_addr = bind_addr;
    }
    if let Some(max_connections) = cli.max_connections {
        config.max_connections = max_connections;
    }
    if let Some(idle_timeout_secs) = cli.idle_timeout_secs {
        config.idle_timeout_secs = idle_timeout_secs;
    }
    if let Some(secret) = cli.admin_secret {
        config.admin_secret = secret;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Some(log_file) = cli.log_file {
        config.logging.file = Some(log_file);
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    if cli.create_root_dir {
        tokio::fs::create_dir_all(&config.root_dir)
            .await
            .with_context(|| format!("creating {}", config.root_dir.display()))?;
    }

    if cli.init_config {
        write_config(&cli.config, &config)?;
        println!("Wrote config to {}", cli.config.display());
        return Ok(());
    }

    if cli.check_config {
        validate_config(&config, false)?;
        println!("Config OK: {}", cli.config.display());
        return Ok(());
    }

    validate_config(&config, true)?;
    let _log_guard = init_logging(&config)?;

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting Snow Owl UDP file server"
    );

    let server = Server::bind(config).context("binding UDP socket")?;
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}
