// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Engine self-observability: a Prometheus endpoint over the counters
//! the workers maintain while running.

use axum::{Router, http::StatusCode, response::Response, routing::get};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};

/// Register descriptions for every engine counter.
fn init_metrics() {
    describe_counter!(
        report::processor::OBSERVATIONS_METRIC,
        "Observations consumed by the processors"
    );
    describe_counter!(
        report::processor::BATCHES_METRIC,
        "Update batches flushed to trackers"
    );
    describe_counter!(
        report::tracker::INTERVALS_FINALIZED_METRIC,
        "Intervals finalized across all trackers"
    );
    describe_counter!(
        report::tracker::INTERVALS_PRUNED_METRIC,
        "Outstanding intervals dropped without completing"
    );
    describe_counter!(
        report::merger::INTERVALS_MERGED_METRIC,
        "Intervals merged and emitted"
    );
    describe_counter!(
        report::merger::INTERVALS_INCOMPLETE_METRIC,
        "Intervals suppressed after an early tracker halt"
    );
    describe_counter!(
        transport::SEQ_GAPS_METRIC,
        "Frames detected as lost by sequence numbers"
    );
}

/// Simple Prometheus metrics handler
#[derive(Clone)]
struct PrometheusHandler {
    prometheus_handle: PrometheusHandle,
}

/// HTTP handler for /metrics endpoint
async fn metrics_handler(
    axum::extract::State(handler): axum::extract::State<PrometheusHandler>,
) -> Response<String> {
    let metrics = handler.prometheus_handle.render();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=1.0.0; charset=utf-8")
        .body(metrics)
        .unwrap_or_default()
}

/// Start the metrics server on its own thread.
pub fn start_metrics_server(
    addr: std::net::SocketAddr,
) -> Result<std::thread::JoinHandle<()>, Box<dyn std::error::Error>> {
    init_metrics();
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let handler = PrometheusHandler { prometheus_handle };

    let handle = std::thread::Builder::new()
        .name("metrics-server".to_string())
        .spawn(move || {
            info!("Starting metrics server thread");

            /* create tokio runtime */
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .enable_time()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Tokio runtime creation failed for metrics server: {e}");
                    return;
                }
            };

            /* block thread to run metrics HTTP server */
            rt.block_on(async {
                let app = Router::new()
                    .route("/metrics", get(metrics_handler))
                    .with_state(handler);

                info!("Metrics server listening on {addr}");

                if let Err(e) = axum_server::bind(addr).serve(app.into_make_service()).await {
                    error!("Metrics server error: {e}");
                }
            });
        })?;

    Ok(handle)
}
