pub mod bridge;
pub mod config;
pub mod mqtt;
pub mod telemetry;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::mqtt::MqttConnector;
use crate::telemetry::{delta, LocalBus};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = config::config_path();
    info!("Using config {}", config_path.display());
    let config = BridgeConfig::load(&config_path).await?;

    // SignalK deltas arrive line by line on stdin
    let bus = Arc::new(LocalBus::new());
    let feed_cancel = CancellationToken::new();
    let feed = tokio::spawn(delta::feed_from_reader(
        BufReader::new(tokio::io::stdin()),
        bus.clone(),
        config.vessel.self_id.clone(),
        feed_cancel.clone(),
    ));

    let connector = MqttConnector::new(config.broker.clone());
    let mut bridge = Bridge::new();
    if let Err(e) = bridge.start(&config, bus, &connector).await {
        feed_cancel.cancel();
        return Err(eyre!("Failed to start bridge: {}", e));
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutting down");

    bridge.stop().await;
    feed_cancel.cancel();
    match feed.await {
        Ok(published) => info!("Delta feed published {} values", published),
        Err(e) => warn!("Delta feed task failed: {}", e),
    }

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
