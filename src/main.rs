//! Coterie CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use coterie::application::App;
use coterie::domain::ports::{ActionRegistry, ScriptedWorker};
use coterie::infrastructure::{
    ConfigLoader, DatabaseConnection, HttpServer, InMemorySharedCache, SqliteStore,
};

#[derive(Parser)]
#[command(name = "coterie", about = "Multi-agent orchestration substrate", version)]
struct Cli {
    /// Path to a config file (defaults to .coterie/config.yaml + env).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until interrupted.
    Serve,
    /// Load and validate configuration, then exit.
    ConfigCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    match cli.command {
        Commands::ConfigCheck => {
            println!("configuration ok");
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: coterie::Config) -> Result<()> {
    let _log_guard = coterie::infrastructure::logging::init(&config.logging)?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let database_url = format!("sqlite:{}", config.database.path);
    let db = DatabaseConnection::new(&database_url, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    db.migrate().await.context("Failed to apply schema")?;
    let store = Arc::new(SqliteStore::new(db.pool().clone()));

    // The Worker is an external collaborator; the scripted stand-in
    // keeps the binary runnable without provider credentials.
    // TODO: load a provider-backed Worker from config once one lands.
    let worker = Arc::new(ScriptedWorker::always("no provider configured"));

    let app = Arc::new(
        App::build(
            config.clone(),
            store,
            worker,
            Some(Arc::new(InMemorySharedCache::new())),
            ActionRegistry::with_builtins(),
        )
        .await,
    );
    app.start().await.map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http = HttpServer::new(app.ws_hub.clone(), config.ws.clone());
    let http_task = tokio::spawn(async move {
        if let Err(e) = http
            .serve_with_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
        {
            tracing::error!(error = %e, "http server exited");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    app.shutdown(Duration::from_secs(10)).await;
    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;
    db.close().await;
    Ok(())
}
