//! Uniform access to heterogeneous data backends.
//!
//! Every backend implements [`Connector`]. A fetch never raises: it returns a
//! [`FetchResult`] whose `Ok` side is a [`ResultBundle`] and whose `Err` side is a
//! [`ConnectorError`], so module handlers can treat every source identically.

pub mod api;
pub mod error;
pub mod sql;

pub use api::ApiConnector;
pub use error::ConnectorError;
pub use sql::SqlConnector;

use crate::config::DataSourceConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

pub type FetchResult = std::result::Result<ResultBundle, ConnectorError>;

/// Contract implemented by every data source.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique identifier, fixed at construction
    fn name(&self) -> &str;

    fn kind(&self) -> ConnectorKind;

    fn is_connected(&self) -> bool;

    /// Acquire the backend resource. Failures are logged and reported as `false`.
    async fn connect(&self) -> bool;

    /// Release the backend resource; a no-op success when nothing is held.
    async fn disconnect(&self) -> bool;

    /// Run one query (SQL) or request (API), connecting first when needed.
    async fn fetch_data(&self, request: &str, params: Option<&Value>) -> FetchResult;

    /// Lightweight round-trip reporting reachability.
    async fn test_connection(&self) -> bool;

    fn get_info(&self) -> ConnectorInfo;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Sql,
    Api,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Sql => "sql",
            ConnectorKind::Api => "api",
        }
    }
}

/// Metadata describing a connector: `{name, type, is_connected, ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectorKind,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub details: ConnectorDetails,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ConnectorDetails {
    Sql { engine: String, database: String },
    Api { base_url: String, timeout_seconds: f64 },
}

/// Success half of a fetch: `{data, execution_time_seconds, ...metadata}`.
#[derive(Debug, Clone, Serialize)]
pub struct ResultBundle {
    pub data: Value,
    #[serde(rename = "execution_time_seconds", serialize_with = "as_seconds")]
    pub execution_time: Duration,
    #[serde(flatten)]
    pub metadata: BundleMetadata,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum BundleMetadata {
    Sql {
        count: usize,
        columns: Vec<String>,
    },
    Api {
        status_code: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        headers: BTreeMap<String, String>,
    },
}

fn as_seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ResultBundle {
    /// Row count for SQL bundles
    pub fn count(&self) -> Option<usize> {
        match &self.metadata {
            BundleMetadata::Sql { count, .. } => Some(*count),
            BundleMetadata::Api { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.metadata {
            BundleMetadata::Api { status_code, .. } => Some(*status_code),
            BundleMetadata::Sql { .. } => None,
        }
    }
}

/// Render a fetch outcome in the shape the boundary layer hands to clients.
pub fn result_to_json(result: &FetchResult) -> Value {
    match result {
        Ok(bundle) => serde_json::to_value(bundle).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("failed to serialize result: {}", e) })
        }),
        Err(e) => e.to_body(),
    }
}

/// Connection flag plus timestamp shared by the concrete connectors.
///
/// Only `connect`/`disconnect` flip it, always while holding the connector's
/// resource lock.
#[derive(Debug, Default)]
pub(crate) struct LinkState {
    connected: AtomicBool,
    connected_at: Mutex<Option<DateTime<Utc>>>,
}

impl LinkState {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self
            .connected_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mark_connected(&self) {
        *self
            .connected_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

/// Build the connector for one named data source.
pub fn build_connector(name: &str, config: &DataSourceConfig) -> Arc<dyn Connector> {
    match config {
        DataSourceConfig::Sql(sql) => Arc::new(SqlConnector::new(name, sql.clone())),
        DataSourceConfig::Api(api) => Arc::new(ApiConnector::new(name, api.clone())),
    }
}

/// Named connectors built from `[data_sources]`.
#[derive(Default, Clone)]
pub struct DataSources {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl DataSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(sources: &BTreeMap<String, DataSourceConfig>) -> Self {
        let mut data_sources = Self::new();
        for (name, config) in sources {
            data_sources.insert(build_connector(name, config));
        }
        info!("Configured {} data source(s)", data_sources.len());
        data_sources
    }

    pub fn insert(&mut self, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(connector.name().to_string(), connector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.connectors.keys().map(String::as_str).collect()
    }

    pub fn infos(&self) -> Vec<ConnectorInfo> {
        self.connectors.values().map(|c| c.get_info()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Connector>> {
        self.connectors.values()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
