//! Prometheus metrics for connectors and the module registry.
//!
//! The recorder is installed once per process; the handle is kept so the HTTP
//! layer can render the exposition text in-process at `/metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

const FETCH_TOTAL: &str = "kpi_connector_fetch_total";
const FETCH_DURATION: &str = "kpi_connector_fetch_duration_seconds";
const DISCOVERY_FAILURES: &str = "kpi_registry_discovery_failures_total";
const REGISTERED_MODULES: &str = "kpi_registry_modules";

/// Install the global Prometheus recorder.
///
/// Idempotent. Returns `None` when another recorder was already installed
/// (for example by an embedding application).
pub fn init_metrics() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("Prometheus recorder installed");
                describe_metrics();
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        })
        .clone()
}

fn describe_metrics() {
    ::metrics::describe_counter!(FETCH_TOTAL, "Connector fetch_data calls by outcome");
    ::metrics::describe_histogram!(
        FETCH_DURATION,
        ::metrics::Unit::Seconds,
        "Wall-clock time of the underlying query or HTTP call"
    );
    ::metrics::describe_counter!(
        DISCOVERY_FAILURES,
        "Feature modules skipped because their descriptor failed"
    );
    ::metrics::describe_gauge!(REGISTERED_MODULES, "Modules currently in the registry");
}

/// Metrics recorded around connector fetches
pub struct ConnectorMetrics;

impl ConnectorMetrics {
    /// `error_kind` is `None` for a successful fetch, else [`ConnectorError::kind`].
    ///
    /// [`ConnectorError::kind`]: crate::connectors::ConnectorError::kind
    pub fn record_fetch(
        connector: &str,
        kind: &'static str,
        elapsed: Duration,
        error_kind: Option<&'static str>,
    ) {
        let outcome = if error_kind.is_none() { "success" } else { "error" };
        ::metrics::counter!(
            FETCH_TOTAL,
            "connector" => connector.to_string(),
            "kind" => kind,
            "outcome" => outcome,
            "error_kind" => error_kind.unwrap_or("none")
        )
        .increment(1);
        ::metrics::histogram!(
            FETCH_DURATION,
            "connector" => connector.to_string(),
            "kind" => kind
        )
        .record(elapsed.as_secs_f64());
    }
}

/// Metrics recorded by the module registry
pub struct RegistryMetrics;

impl RegistryMetrics {
    pub fn record_discovery_failure(module_id: &str) {
        ::metrics::counter!(DISCOVERY_FAILURES, "module" => module_id.to_string()).increment(1);
    }

    pub fn set_module_count(count: usize) {
        ::metrics::gauge!(REGISTERED_MODULES).set(count as f64);
    }
}
