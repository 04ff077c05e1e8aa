use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use vocab_server::{
    api::{AppState, router},
    config::Config,
    db,
    utils::init_log,
};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// SQLite connection url
    #[arg(short, long)]
    database: Option<String>,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Directory for daily rolling log files
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database_url = database;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(log_dir) = args.log_dir {
        config.log_dir = Some(log_dir);
    }
    let _guard = init_log(config.log_dir.clone())?;

    let database = db::connect(&config.database_url).await?;
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(database, config));
    let listener = TcpListener::bind(&addr).await?;
    info!("Starting server at http://{}", addr);
    info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
