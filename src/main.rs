//! tagstream - RFID inventory tracking service
//!
//! Ingests RFID tag reads from fixed sensors over a message bus, tracks each
//! tag's presence, location, and movement state through a per-tag state
//! machine with RSSI-based location estimation, and emits inventory
//! lifecycle events to downstream consumers. Shipping notices reconcile
//! against the same tag store.
//!
//! Module structure:
//! - `domain/` - Tag records, lifecycle events, wire types, EPC decoders
//! - `io/` - External interfaces (MQTT ingest/egress, store port, alerts)
//! - `services/` - Business logic (engine, aggregator, reconciler)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

use tagstream::infra::{Config, Metrics};
use tagstream::io::{
    create_egress_channel, start_ingest_client, AlertClient, IngestContext, MemoryTagStore,
    MqttPublisher, TagStore,
};
use tagstream::services::scheduler::run_scheduler;
use tagstream::services::{AsnReconciler, SensorRegistry, TagEngine};

/// Graceful shutdown budget; pending events are dropped after this
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

/// tagstream - RFID inventory tracking service
#[derive(Parser, Debug)]
#[command(name = "tagstream", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "tagstream_starting");

    let args = Args::parse();

    // Unparsable configuration is fatal; a missing file falls back to defaults
    let config = Config::load_from_path(&args.config)?;

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        rssi_window_size = %config.rssi_window_size(),
        exit_read_threshold = %config.exit_read_threshold(),
        hysteresis_margin = %config.hysteresis_margin(),
        aggregate_departed_threshold_ms = %config.aggregate_departed_threshold_ms(),
        age_out_hours = %config.age_out_hours(),
        asn_facility = %config.asn_facility_id(),
        "config_loaded"
    );

    // Start embedded MQTT broker if enabled
    if config.broker_enabled() && !tagstream::infra::broker::start_embedded_broker(&config) {
        warn!("embedded broker unavailable, expecting an external broker");
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components. The in-memory store backs self-contained runs; the
    // external document-store adapter implements the same port in production.
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(SensorRegistry::new());
    let store: Arc<dyn TagStore> = Arc::new(MemoryTagStore::new());
    let reconciler = Arc::new(AsnReconciler::new(&config, store.clone(), metrics.clone()));
    let alerts = Arc::new(AlertClient::new(&config));

    // Engine input channel (bounded for backpressure) and egress channel
    let (engine_tx, engine_rx) = mpsc::channel(config.engine_queue_capacity());
    let (egress_sender, publisher_handle) = if config.mqtt_egress_enabled() {
        let (sender, egress_rx) = create_egress_channel(1000);
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
        (Some(sender), Some(handle))
    } else {
        (None, None)
    };

    // Start the scheduler (aggregate-departed and ageout tickers)
    let scheduler_tx = engine_tx.clone();
    let scheduler_shutdown = shutdown_rx.clone();
    let aggregate_tick_ms = config.aggregate_departed_tick_ms();
    tokio::spawn(async move {
        run_scheduler(scheduler_tx, aggregate_tick_ms, scheduler_shutdown).await;
    });

    // Start the MQTT ingest client
    let ingest_config = config.clone();
    let ingest_ctx = IngestContext {
        engine_tx,
        reconciler,
        store: store.clone(),
        alerts,
        metrics: metrics.clone(),
    };
    let ingest_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_ingest_client(&ingest_config, ingest_ctx, ingest_shutdown).await {
            error!(error = %e, "ingest client error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_service = config.service_name().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = tagstream::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_service,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "metrics server error");
            }
        });
    }

    // Start metrics reporter: periodic log summary plus egress snapshot
    let report_metrics = metrics.clone();
    let report_egress = egress_sender.clone();
    let report_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(report_interval));
        loop {
            interval.tick().await;
            let summary = report_metrics.report();
            summary.log();
            if let Some(ref egress) = report_egress {
                egress.send_metrics(summary);
            }
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the engine (main event processing loop); it drains its queue and
    // force-flushes pending departeds on shutdown
    let mut engine = TagEngine::new(config, registry, store, metrics, egress_sender);
    info!("engine_ready");
    engine.run(engine_rx, shutdown_rx).await;
    drop(engine);

    // Give the publisher the rest of the shutdown budget to drain
    if let Some(handle) = publisher_handle {
        if tokio::time::timeout(SHUTDOWN_BUDGET, handle).await.is_err() {
            warn!("egress drain exceeded shutdown budget, pending events dropped");
        }
    }

    info!("tagstream shutdown complete");
    Ok(())
}
