use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

use crate::constants::METRICS_ADDR_ENV;

static INIT: Once = Once::new();

/// Install the Prometheus exporter when `CAT_INGEST_METRICS_ADDR` is set.
///
/// Idempotent. Without the variable the `metrics` macros stay no-ops.
pub fn init_metrics() {
    INIT.call_once(|| {
        let addr_str = match std::env::var(METRICS_ADDR_ENV) {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return,
        };
        let addr: SocketAddr = match addr_str.trim().parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid {} '{}': {}", METRICS_ADDR_ENV, addr_str, e);
                return;
            }
        };
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => {
                info!("Prometheus exporter listening on http://{}/metrics", addr);
                describe_metrics();
            }
            Err(e) => warn!("Prometheus exporter install failed: {}", e),
        }
    });
}

fn describe_metrics() {
    use ::metrics::{describe_counter, describe_histogram, Unit};

    describe_counter!("cat_ingest_download_bytes_total", Unit::Bytes, "Bytes of catalog files downloaded");
    describe_counter!("cat_ingest_download_retries_total", "Download attempts that were retried");
    describe_histogram!("cat_ingest_download_duration_seconds", Unit::Seconds, "Time to download one file");
    describe_counter!("cat_ingest_rows_read_total", "Source rows read");
    describe_counter!("cat_ingest_rows_accepted_total", "Rows accepted by the quality gate");
    describe_counter!("cat_ingest_rows_rejected_total", "Rows rejected, by reason");
    describe_counter!("cat_ingest_rows_inserted_total", "Rows inserted into the target store");
    describe_histogram!("cat_ingest_batch_load_seconds", Unit::Seconds, "Time to load one batch");
    describe_counter!("cat_ingest_file_errors_total", "Files that failed a pipeline stage");
}
