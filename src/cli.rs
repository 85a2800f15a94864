//! CLI entrypoint: `turnkeeper serve [--host] [--port] [--storage-dir] [--config]`.

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "turnkeeper")]
#[command(about = "Real-time, half-duplex voice agent server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the signaling/HTTP server.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        storage_dir: Option<String>,
        #[arg(long)]
        config: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { host: None, port: None, storage_dir: None, config: None }) {
        Commands::Serve { host, port, storage_dir, config } => {
            if let Some(path) = config {
                std::env::set_var("VOICE_AGENT_CONFIG", path);
            }

            let mut config = crate::config::Config::load()?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = storage_dir {
                config.server.storage_dir = std::path::PathBuf::from(dir);
            }

            crate::server::start(config).await?;
        }
    }

    Ok(())
}
