//! Prometheus metrics HTTP endpoint
//!
//! Exposes service metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with service label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    service: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{service=\"{service}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, service: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "tagstream_readings_received_total",
        "Bus readings received",
        MetricType::Counter,
        service,
        summary.readings_received,
    );
    write_metric(
        &mut output,
        "tagstream_readings_invalid_total",
        "Bus readings rejected by validation",
        MetricType::Counter,
        service,
        summary.readings_invalid,
    );
    write_metric(
        &mut output,
        "tagstream_reads_processed_total",
        "Tag reads processed by the engine",
        MetricType::Counter,
        service,
        summary.reads_processed,
    );
    write_metric(
        &mut output,
        "tagstream_reads_dropped_rssi_total",
        "Reads dropped below the sensor RSSI floor",
        MetricType::Counter,
        service,
        summary.reads_dropped_rssi,
    );
    write_metric(
        &mut output,
        "tagstream_reads_dropped_pos_total",
        "POS reads on unknown EPCs dropped",
        MetricType::Counter,
        service,
        summary.reads_dropped_pos,
    );
    write_metric(
        &mut output,
        "tagstream_reads_dropped_suspended_total",
        "Reads dropped while the scheduler gate is suspended",
        MetricType::Counter,
        service,
        summary.reads_dropped_suspended,
    );
    write_metric(
        &mut output,
        "tagstream_reads_malformed_total",
        "Malformed reads dropped",
        MetricType::Counter,
        service,
        summary.reads_malformed,
    );
    write_metric(
        &mut output,
        "tagstream_reads_dropped_queue_total",
        "Reads dropped on a full engine queue",
        MetricType::Counter,
        service,
        summary.reads_dropped_queue,
    );
    write_metric(
        &mut output,
        "tagstream_events_emitted_total",
        "Lifecycle events emitted",
        MetricType::Counter,
        service,
        summary.events_emitted,
    );
    write_metric(
        &mut output,
        "tagstream_envelopes_published_total",
        "Inventory event envelopes published",
        MetricType::Counter,
        service,
        summary.envelopes_published,
    );
    write_metric(
        &mut output,
        "tagstream_asn_epcs_total",
        "ASN EPCs reconciled",
        MetricType::Counter,
        service,
        summary.asn_epcs_processed,
    );
    write_metric(
        &mut output,
        "tagstream_asn_errors_total",
        "ASN payloads rejected",
        MetricType::Counter,
        service,
        summary.asn_errors,
    );
    write_metric(
        &mut output,
        "tagstream_store_errors_total",
        "Tag store operation failures",
        MetricType::Counter,
        service,
        summary.store_errors,
    );
    write_metric(
        &mut output,
        "tagstream_active_tag_refs",
        "Active TagRefs in the engine",
        MetricType::Gauge,
        service,
        summary.active_tag_refs,
    );
    write_metric(
        &mut output,
        "tagstream_pending_departed",
        "Departed events awaiting aggregation",
        MetricType::Gauge,
        service,
        summary.pending_departed,
    );
    write_metric(
        &mut output,
        "tagstream_scheduler_running",
        "Scheduler gate state (1=running, 0=suspended)",
        MetricType::Gauge,
        service,
        summary.running as u64,
    );

    output
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    service: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let fallback = || Response::new(Full::new(Bytes::new()));
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.snapshot(), &service);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap_or_else(|_| fallback()))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .unwrap_or_else(|_| fallback())),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| fallback())),
    }
}

/// Serve /metrics and /health until shutdown
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    service_name: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let service_name = Arc::new(service_name);

    info!(port = %port, "metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let service_name = service_name.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let service_name = service_name.clone();
                                async move { handle_request(req, metrics, service_name).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "metrics_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "metrics_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
