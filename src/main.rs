//! Wayfinder - indoor guidance from BLE beacon sightings
//!
//! Module structure:
//! - `domain/` - Topology and signal types
//! - `io/` - External interfaces (MQTT, serial scanner, control socket, egress)
//! - `services/` - Navigation pipeline (signal store, estimator, planner, guidance)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use wayfinder::infra::{Config, Metrics};
use wayfinder::io::{create_egress_channel, start_control_listener, MqttPublisher, SerialScanner};
use wayfinder::services::model_loader::{source_for, ModelLoader};
use wayfinder::services::Navigator;

/// Navigator command queue size
const NAV_QUEUE: usize = 1000;

/// Wayfinder - indoor beacon guidance
#[derive(Parser, Debug)]
#[command(name = "wayfinder", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("wayfinder starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    let topology = Arc::new(
        config.topology().with_context(|| format!("invalid topology in {}", config.config_file()))?,
    );

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        locations = %topology.locations().len(),
        beacons = %topology.beacon_count(),
        coordinates = %topology.has_coordinates(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        scanner_topic = %config.mqtt_scanner_topic(),
        staleness_ms = %config.staleness_ms(),
        tick_ms = %config.tick_ms(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    wayfinder::infra::broker::start_embedded_broker(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let (nav_tx, nav_rx) = mpsc::channel(NAV_QUEUE);

    // Scanner ingress over MQTT
    if config.mqtt_enabled() {
        let mqtt_config = config.clone();
        let mqtt_tx = nav_tx.clone();
        let mqtt_metrics = metrics.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = wayfinder::io::mqtt::start_scanner_client(
                &mqtt_config,
                mqtt_tx,
                mqtt_metrics,
                mqtt_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "MQTT client error");
            }
        });
    }

    // Scanner ingress over serial
    if config.scanner_enabled() {
        let scanner = SerialScanner::new(&config, nav_tx.clone(), metrics.clone());
        let scanner_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            scanner.run(scanner_shutdown).await;
        });
    }

    if config.control_enabled() {
        let control_port = config.control_port();
        let control_tx = nav_tx.clone();
        let control_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_control_listener(control_port, control_tx, control_shutdown).await
            {
                tracing::error!(error = %e, "control listener error");
            }
        });
    }

    // Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = wayfinder::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Queue depth sampler
    let depth_metrics = metrics.clone();
    let depth_tx = nav_tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            let depth = depth_tx.max_capacity() - depth_tx.capacity();
            depth_metrics.set_advert_queue_depth(depth as u64);
        }
    });

    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        Some(egress_sender)
    } else {
        None
    };

    // Metrics reporter: log, and publish the same snapshot when egress is on
    let reporter_metrics = metrics.clone();
    let reporter_egress = egress_sender.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = reporter_metrics.report();
            summary.log();
            if let Some(ref sender) = reporter_egress {
                sender.send_metrics(summary);
            }
        }
    });

    let mut navigator = Navigator::new(&config, topology, metrics.clone(), egress_sender);

    if let Some(location) = config.classifier_model() {
        let timeout = Duration::from_millis(config.classifier_timeout_ms());
        let source = source_for(location, timeout)
            .with_context(|| format!("invalid classifier model source {}", location))?;
        let loader = ModelLoader::new(source, nav_tx.clone(), metrics);
        loader.spawn_load();
        navigator = navigator.with_loader(loader);
    } else {
        info!("classifier_disabled: no model configured");
    }
    drop(nav_tx);

    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    navigator.run(nav_rx, shutdown_rx).await;

    info!("wayfinder shutdown complete");
    Ok(())
}
