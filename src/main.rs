use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use picoweb::app::{App, HeartbeatController};
use picoweb::config::Config;
use picoweb::events::EventManager;
use picoweb::net::ServerIdentity;
use picoweb::router::Router;
use picoweb::server::Server;
use picoweb::storage::{LocalStorage, Storage};
use picoweb::task::TaskRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(&cfg.storage.root));
    storage.mount().context("mounting storage")?;

    let events = Arc::new(EventManager::new(cfg.events.queue_depth));
    let router = Arc::new(Router::new(cfg.router.lock_timeout()));

    let app = App::new(Arc::clone(&storage), Arc::clone(&events), &cfg.app.programs_path)
        .with_api_token(cfg.app.api_token.clone());
    app.register(&router).await?;
    router.print_routes().await?;

    let mut runner = TaskRunner::new(Arc::clone(&events));
    runner.add(HeartbeatController::new(Duration::from_millis(cfg.app.heartbeat_interval_ms)));
    let controllers = runner.start();

    let mut server = Server::new(&cfg, router, Arc::clone(&events), storage);
    if let Some(tls) = &cfg.tls {
        let cert = std::fs::read_to_string(&tls.cert_path).with_context(|| format!("reading {}", tls.cert_path))?;
        let key = std::fs::read_to_string(&tls.key_path).with_context(|| format!("reading {}", tls.key_path))?;
        server = server.with_tls(ServerIdentity::from_pem(&cert, &key)?);
    }
    let handle = server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    handle.shutdown().await;
    for task in controllers {
        task.abort();
    }

    Ok(())
}
