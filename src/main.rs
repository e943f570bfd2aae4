use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;

use spotprice_alerts::clock::SystemClock;
use spotprice_alerts::config::AppConfig;
use spotprice_alerts::runtime::App;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();
    info!("Starting spot price alerts...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let app = match App::from_config(&config, Arc::new(SystemClock)).await {
        Ok(app) => app,
        Err(e) => {
            error!("❌ Failed to start: {e}");
            std::process::exit(1);
        }
    };

    if config.fetch_on_startup {
        info!("📡 Initial price fetch");
        app.fetcher.fetch_today().await;
        app.fetcher.fetch_tomorrow().await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = app.scheduler.spawn(shutdown_rx);
    info!("👂 Scheduler running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("🛑 Shutting down");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    info!("👋 Stopped");
}
