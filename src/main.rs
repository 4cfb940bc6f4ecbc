use attune_lib::config::{Config, StorageKind, CONFIG_ENV};
use attune_lib::logging::init_logging;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "attune", version, about = "Emotion-aware reply server")]
struct Cli {
    /// Path to config.toml
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Use SQLite storage at this path
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(path) = cli.database {
        config.storage.kind = StorageKind::Sqlite;
        config.storage.database_path = Some(path);
    }

    init_logging(&config.logging.level, config.logging.json)?;
    attune_lib::run(config).await
}
