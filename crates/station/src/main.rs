mod config;
mod db;
mod error;
mod hub;
mod outdoor;
mod reader;
mod scheduler;
mod sensor;
mod state;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use db::Db;
use hub::BroadcastHub;
use outdoor::OutdoorCache;
use reader::ReadCoordinator;
use sensor::Sensor;
use state::AppState;

#[cfg(not(any(feature = "sim", feature = "bme280")))]
compile_error!("at least one sensor backend feature (`sim` or `bme280`) must be enabled");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    let db_url = env::var("DB_URL").unwrap_or_else(|_| cfg.storage.db_url.clone());

    // ── Store ───────────────────────────────────────────────────────
    let db = Db::connect(&db_url, cfg.storage.retention_secs).await?;
    db.migrate().await?;
    info!("store ready");

    // ── Sensor ──────────────────────────────────────────────────────
    // A sensor that won't initialize is fatal: refuse to serve traffic.
    let sensor = open_sensor(&cfg)?;
    let reader = ReadCoordinator::new(sensor);

    // ── Pipeline ────────────────────────────────────────────────────
    let hub = Arc::new(BroadcastHub::new());
    let outdoor = Arc::new(OutdoorCache::new(cfg.outdoor.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = AppState::new(
        db.clone(),
        reader.clone(),
        Arc::clone(&outdoor),
        Arc::clone(&hub),
        shutdown_rx.clone(),
    );

    let log_task = tokio::spawn(scheduler::run_log_ticks(
        reader.clone(),
        db.clone(),
        cfg.cadence.log_interval_min,
        shutdown_rx.clone(),
    ));
    let broadcast_task = tokio::spawn(scheduler::run_broadcast_ticks(
        reader,
        Arc::clone(&hub),
        cfg.cadence.broadcast_interval_ms,
        cfg.cadence.broadcast_start_delay_ms,
        shutdown_rx.clone(),
    ));
    let web_task = tokio::spawn(web::serve(app, shutdown_rx));

    // ── Shutdown: no new ticks, drain in-flight work, then release ──
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = log_task.await;
    let _ = broadcast_task.await;
    match web_task.await {
        Ok(Err(e)) => error!("web server exited with error: {e:#}"),
        Err(e) => error!("web server task failed: {e}"),
        Ok(Ok(())) => {}
    }

    db.close().await;
    info!("drained and stopped");
    Ok(())
}

#[cfg(feature = "bme280")]
fn open_sensor(cfg: &config::Config) -> Result<Arc<dyn Sensor>> {
    let s = sensor::bme280::Bme280::open(cfg.sensor.i2c_bus, cfg.sensor.i2c_addr)
        .context("BME280 initialization failed")?;
    Ok(Arc::new(s))
}

#[cfg(all(feature = "sim", not(feature = "bme280")))]
fn open_sensor(_cfg: &config::Config) -> Result<Arc<dyn Sensor>> {
    info!("using simulated sensor (build with --features bme280 for hardware reads)");
    Ok(Arc::new(sensor::sim::SimSensor::new()))
}
