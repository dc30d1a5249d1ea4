//! labflow-sub: submission workflow service
//!
//! SQLite-backed HTTP service managing submissions, their request graphs and
//! request state transitions.

use anyhow::Context;
use clap::Parser;
use labflow_sub::api::{run_server, AppContext};
use labflow_sub::db;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "labflow-sub", about = "LabFlow submission workflow service")]
struct Args {
    /// Data folder containing the database
    #[arg(long, env = "LABFLOW_DATA_FOLDER")]
    data_folder: Option<String>,

    /// Database file path (overrides the data folder default)
    #[arg(long, env = "LABFLOW_SUB_DB")]
    database: Option<PathBuf>,

    /// HTTP listen port
    #[arg(long, env = "LABFLOW_SUB_PORT", default_value_t = 5750)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let db_path = match args.database {
        Some(path) => path,
        None => {
            let folder =
                labflow_common::config::resolve_data_folder(args.data_folder.as_deref(), "LABFLOW_DATA_FOLDER")
                    .context("Failed to resolve data folder")?;
            folder.join("labflow.db")
        }
    };
    info!("Using database: {}", db_path.display());

    let pool = labflow_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let registry = db::load_registry(&pool)
        .await
        .context("Failed to load request type registry")?;

    let context = AppContext {
        db: pool,
        registry: Arc::new(registry),
    };

    run_server(context, args.port)
        .await
        .context("HTTP server error")?;

    Ok(())
}
