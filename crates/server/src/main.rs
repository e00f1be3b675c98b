use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use cubesync_engine::save::SaveDir;
use cubesync_engine::world::Map;
use cubesync_engine::world::generator::FlatGenerator;
use cubesync_server::commands::CommandRegistry;
use cubesync_server::config::ServerConfig;
use cubesync_server::content;
use cubesync_server::net::{Address, Host};
use cubesync_server::server::Server;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn arg(name: &str) -> Option<String> {
    std::env::args().skip_while(|a| a != name).nth(1)
}

async fn run() -> Result<()> {
    let config_path = arg("--config").map(PathBuf::from);
    let mut config = ServerConfig::load(config_path.as_deref())?;
    if let Some(bind) = arg("--bind") {
        config.bind = bind;
    }
    if let Some(save) = arg("--save") {
        config.save_name = save;
    }

    tracing::info!("cubesync server");

    // ── Blocks and world ─────────────────────────────────────────────────
    let referrer = Arc::new(content::referrer()?);
    tracing::info!("Registered {} block types", referrer.len());

    let save = SaveDir::open_or_create(&config.save_root, &config.save_name, [content::NAMESPACE])?;
    save.check_mods(&referrer)?;
    let generator = FlatGenerator::new(config.flat_layers.clone());
    let map = Arc::new(Map::open(&save, Arc::clone(&referrer), Box::new(generator))?);

    // ── Network ──────────────────────────────────────────────────────────
    let bind: Address = config.bind.parse().context("parsing bind address")?;
    let host = Host::bind(bind, config.host_config()).await?;
    tracing::info!("Listening on {}", host.local_addr()?);

    let commands = CommandRegistry::with_builtins();
    let mut server = Server::start(host, Arc::clone(&map), commands, &config)?;

    let stopped = server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Ctrl+C received, shutting down..."),
                Err(e) => tracing::error!("Cannot listen for Ctrl+C, shutting down: {}", e),
            }
        })
        .await;

    // ── Save on shutdown ─────────────────────────────────────────────────
    tracing::info!("Saving world before exit...");
    let saved = server.shutdown()?;
    tracing::info!("Shutdown save complete: {} chunks written", saved);
    stopped
}
