//! Prometheus metrics HTTP endpoint
//!
//! Exposes navigation metrics in Prometheus text format at /metrics,
//! plus a liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
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

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a counter split by one label
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    label: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value, count) in values {
        let _ = writeln!(output, "{name}{{site=\"{site}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_command_metrics(&mut output, site_id, &summary);
    write_advert_metrics(&mut output, site_id, &summary);
    write_session_metrics(&mut output, site_id, &summary);
    write_classifier_metrics(&mut output, site_id, &summary);

    output
}

fn write_command_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "wayfinder_commands_total",
        "Total navigator commands processed",
        MetricType::Counter,
        site,
        summary.commands_total,
    );
    let _ = writeln!(output, "# HELP wayfinder_commands_per_sec Commands processed per second");
    let _ = writeln!(output, "# TYPE wayfinder_commands_per_sec gauge");
    let _ = writeln!(
        output,
        "wayfinder_commands_per_sec{{site=\"{site}\"}} {:.2}",
        summary.commands_per_sec
    );

    write_histogram(
        output,
        "wayfinder_command_latency_us",
        "Command processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "wayfinder_command_latency_p99_us",
        "99th percentile command latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_advert_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labeled_counter(
        output,
        "wayfinder_adverts_total",
        "Beacon advertisements by outcome",
        site,
        "outcome",
        &[
            ("received", summary.adverts_received),
            ("ignored", summary.adverts_ignored),
            ("detached", summary.adverts_detached),
            ("dropped", summary.adverts_dropped),
        ],
    );
    write_metric(
        output,
        "wayfinder_advert_queue_depth",
        "Current navigator queue depth",
        MetricType::Gauge,
        site,
        summary.advert_queue_depth,
    );
    write_metric(
        output,
        "wayfinder_visible_beacons",
        "Fresh observations at the last recompute",
        MetricType::Gauge,
        site,
        summary.visible_beacons,
    );
    write_metric(
        output,
        "wayfinder_recomputes_total",
        "Position recomputes",
        MetricType::Counter,
        site,
        summary.recomputes_total,
    );
    write_metric(
        output,
        "wayfinder_signal_lost_total",
        "Times every beacon went stale during a session",
        MetricType::Counter,
        site,
        summary.signal_lost_total,
    );
}

fn write_session_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "wayfinder_session_state",
        "Session state (0=idle, 1=unknown, 2=located, 3=en_route, 4=arrived)",
        MetricType::Gauge,
        site,
        summary.session_state,
    );
    write_metric(
        output,
        "wayfinder_sessions_started_total",
        "Navigation sessions started",
        MetricType::Counter,
        site,
        summary.sessions_started,
    );
    write_metric(
        output,
        "wayfinder_sessions_stopped_total",
        "Navigation sessions stopped",
        MetricType::Counter,
        site,
        summary.sessions_stopped,
    );
    write_metric(
        output,
        "wayfinder_hops_confirmed_total",
        "Strong sightings of the expected next hop",
        MetricType::Counter,
        site,
        summary.hops_confirmed,
    );
    write_metric(
        output,
        "wayfinder_weak_sightings_total",
        "Weak sightings of the expected next hop",
        MetricType::Counter,
        site,
        summary.weak_sightings,
    );
    write_metric(
        output,
        "wayfinder_path_unclear_total",
        "Sightings off the planned route",
        MetricType::Counter,
        site,
        summary.path_unclear_total,
    );
    write_labeled_counter(
        output,
        "wayfinder_arrivals_total",
        "Arrivals by trigger",
        site,
        "trigger",
        &[("graph", summary.arrivals_graph), ("proximity", summary.arrivals_proximity)],
    );
    write_metric(
        output,
        "wayfinder_egress_dropped_total",
        "Guidance updates dropped on a full egress channel",
        MetricType::Counter,
        site,
        summary.egress_dropped,
    );
}

fn write_classifier_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labeled_counter(
        output,
        "wayfinder_predictions_total",
        "Destination predictions by outcome",
        site,
        "outcome",
        &[
            ("total", summary.predictions_total),
            ("unsure", summary.predictions_unsure),
            ("not_ready", summary.predictions_not_ready),
            ("rejected", summary.predictions_rejected),
        ],
    );
    write_metric(
        output,
        "wayfinder_models_installed_total",
        "Classifier models installed",
        MetricType::Counter,
        site,
        summary.models_installed,
    );
    write_metric(
        output,
        "wayfinder_model_load_failures_total",
        "Classifier model loads that failed",
        MetricType::Counter,
        site,
        summary.model_load_failures,
    );
}

fn respond(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &site_id),
        ),
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, metrics.clone(), site_id.clone())
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
