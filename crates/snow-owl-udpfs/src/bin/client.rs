//! UDP file service client binary
//!
//! Each invocation uses a fresh local port, so `--user/--password` logs in
//! first within the same run when an admin command is needed.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use snow_owl_udpfs::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snow-owl-udpfs-client", about = "UDP file service client", version)]
struct Cli {
    /// Server address (e.g., 127.0.0.1:5678)
    #[arg(short, long, default_value = "127.0.0.1:5678")]
    server: SocketAddr,

    /// Reply timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    /// Admin username; logs in before running the command
    #[arg(long, requires = "password")]
    user: Option<String>,

    /// Admin shared secret
    #[arg(long, requires = "user")]
    password: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Heartbeat
    Ping,
    /// Server counters
    Stats,
    /// List a directory (default: sandbox root)
    List { dir: Option<String> },
    /// Print a file
    Read { name: String },
    /// Upload a local UTF-8 text file (admin)
    Upload { path: PathBuf },
    /// Download a file into a local directory (admin)
    Download {
        name: String,
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Delete a file (admin)
    Delete { name: String },
    /// Case-insensitive filename search
    Search { keyword: String },
    /// File size and timestamps
    Info { name: String },
    /// Send a raw frame and print the reply
    Send { message: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let client = Client::connect(cli.server, Duration::from_secs(cli.timeout))
        .await
        .with_context(|| format!("connecting to {}", cli.server))?;

    if let (Some(user), Some(password)) = (&cli.user, &cli.password) {
        let reply = client.login(user, password).await?;
        if !reply.starts_with("SUCCESS") {
            bail!("login failed: {reply}");
        }
    }

    let reply = match cli.command {
        Command::Ping => client.ping().await?,
        Command::Stats => client.stats().await?,
        Command::List { dir } => client.list(dir.as_deref()).await?,
        Command::Read { name } => client.read(&name).await?,
        Command::Upload { path } => client.upload_file(&path).await?,
        Command::Download { name, out_dir } => {
            let path = client.download_to(&name, &out_dir).await?;
            format!("saved {}", path.display())
        }
        Command::Delete { name } => client.delete(&name).await?,
        Command::Search { keyword } => client.search(&keyword).await?,
        Command::Info { name } => client.info(&name).await?,
        Command::Send { message } => client.request(&message).await?,
    };

    println!("{reply}");
    if reply.starts_with("ERROR:") {
        std::process::exit(1);
    }
    Ok(())
}
