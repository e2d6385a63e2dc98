use super::{
    BundleMetadata, Connector, ConnectorDetails, ConnectorError, ConnectorInfo, ConnectorKind,
    FetchResult, LinkState, ResultBundle,
};
use crate::config::SqlConfig;
use crate::metrics::ConnectorMetrics;
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, Statement, ToSql};
use serde_json::{Map, Number, Value};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// The only engine this connector can open.
pub const SQLITE_ENGINE: &str = "sqlite";

/// Probe used by `test_connection`.
pub const PROBE_QUERY: &str = "SELECT 1";

/// Connector over the embedded SQLite engine.
pub struct SqlConnector {
    name: String,
    config: SqlConfig,
    conn: Mutex<Option<Connection>>,
    link: LinkState,
}

impl SqlConnector {
    pub fn new(name: impl Into<String>, config: SqlConfig) -> Self {
        let name = name.into();
        info!(connector = %name, engine = %config.engine, "Initializing SQL connector");
        Self {
            name,
            config,
            conn: Mutex::new(None),
            link: LinkState::default(),
        }
    }

    pub fn engine(&self) -> String {
        self.config.engine.to_lowercase()
    }

    pub fn database(&self) -> &str {
        &self.config.name
    }

    fn open(&self) -> Result<Connection, ConnectorError> {
        let engine = self.engine();
        if engine != SQLITE_ENGINE {
            return Err(ConnectorError::Configuration(format!(
                "unsupported database engine: {}",
                engine
            )));
        }
        Connection::open(&self.config.name).map_err(ConnectorError::from)
    }

    /// Connect while the caller already holds the resource lock.
    fn connect_locked(&self, slot: &mut Option<Connection>) -> bool {
        if slot.is_some() && self.link.is_connected() {
            return true;
        }
        match self.open() {
            Ok(conn) => {
                *slot = Some(conn);
                self.link.mark_connected();
                info!(connector = %self.name, database = %self.config.name, "Connected to database");
                true
            }
            Err(e) => {
                *slot = None;
                self.link.mark_disconnected();
                error!(connector = %self.name, "Database connection failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Connector for SqlConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Sql
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn connect(&self) -> bool {
        let mut slot = self.conn.lock().await;
        self.connect_locked(&mut slot)
    }

    async fn disconnect(&self) -> bool {
        let mut slot = self.conn.lock().await;
        let Some(conn) = slot.take() else {
            self.link.mark_disconnected();
            return true;
        };
        match conn.close() {
            Ok(()) => {
                self.link.mark_disconnected();
                info!(connector = %self.name, "Disconnected from database");
                true
            }
            Err((conn, e)) => {
                // close failed; keep the handle so a later disconnect can retry
                *slot = Some(conn);
                error!(connector = %self.name, "Database disconnect failed: {}", e);
                false
            }
        }
    }

    #[instrument(skip(self, params), fields(connector = %self.name))]
    async fn fetch_data(&self, query: &str, params: Option<&Value>) -> FetchResult {
        let mut slot = self.conn.lock().await;
        if !self.connect_locked(&mut slot) {
            return Err(ConnectorError::NotConnected);
        }
        let Some(conn) = slot.as_ref() else {
            return Err(ConnectorError::NotConnected);
        };

        let start = Instant::now();
        let outcome = run_query(conn, query, params);
        let elapsed = start.elapsed();
        ConnectorMetrics::record_fetch(
            &self.name,
            ConnectorKind::Sql.as_str(),
            elapsed,
            outcome.as_ref().err().map(ConnectorError::kind),
        );

        match outcome {
            Ok((columns, rows)) => {
                debug!(
                    "Query executed in {:.3}s, {} row(s)",
                    elapsed.as_secs_f64(),
                    rows.len()
                );
                Ok(ResultBundle {
                    metadata: BundleMetadata::Sql {
                        count: rows.len(),
                        columns,
                    },
                    data: Value::Array(rows),
                    execution_time: elapsed,
                })
            }
            Err(e) => {
                error!(error_kind = e.kind(), "Query execution failed: {}", e);
                Err(e)
            }
        }
    }

    async fn test_connection(&self) -> bool {
        self.fetch_data(PROBE_QUERY, None).await.is_ok()
    }

    fn get_info(&self) -> ConnectorInfo {
        ConnectorInfo {
            name: self.name.clone(),
            kind: ConnectorKind::Sql,
            is_connected: self.link.is_connected(),
            connected_at: self.link.connected_at(),
            details: ConnectorDetails::Sql {
                engine: self.engine(),
                database: self.config.name.clone(),
            },
        }
    }
}

/// Execute `query` and collect every row as a column-ordered JSON object.
fn run_query(
    conn: &Connection,
    query: &str,
    params: Option<&Value>,
) -> Result<(Vec<String>, Vec<Value>), ConnectorError> {
    let mut stmt = conn.prepare(query)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let bound = BoundParams::from_json(params);
    let rows = collect_rows(&mut stmt, &columns, &bound)?;
    Ok((columns, rows))
}

fn collect_rows(
    stmt: &mut Statement<'_>,
    columns: &[String],
    bound: &BoundParams,
) -> Result<Vec<Value>, ConnectorError> {
    let mut rows = match bound {
        BoundParams::None => stmt.query([])?,
        BoundParams::Positional(values) => stmt.query(rusqlite::params_from_iter(values.iter()))?,
        BoundParams::Named(pairs) => {
            // names the statement does not use are ignored rather than rejected
            let mut refs: Vec<(&str, &dyn ToSql)> = Vec::with_capacity(pairs.len());
            for (name, value) in pairs {
                if stmt.parameter_index(name)?.is_some() {
                    refs.push((name.as_str(), value as &dyn ToSql));
                }
            }
            stmt.query(refs.as_slice())?
        }
    };

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            record.insert(column.clone(), sql_to_json(row.get_ref(idx)?));
        }
        out.push(Value::Object(record));
    }
    Ok(out)
}

/// Bind parameters decoded from the JSON `params` argument.
#[derive(Debug, PartialEq)]
enum BoundParams {
    None,
    Positional(Vec<SqlValue>),
    Named(Vec<(String, SqlValue)>),
}

impl BoundParams {
    /// Arrays bind positionally, objects by name (`:` prefix added when the key
    /// has no sigil), any other scalar as a single positional value.
    fn from_json(params: Option<&Value>) -> Self {
        match params {
            None | Some(Value::Null) => BoundParams::None,
            Some(Value::Array(items)) => {
                BoundParams::Positional(items.iter().map(json_to_sql).collect())
            }
            Some(Value::Object(map)) => BoundParams::Named(
                map.iter()
                    .map(|(key, value)| (named_placeholder(key), json_to_sql(value)))
                    .collect(),
            ),
            Some(scalar) => BoundParams::Positional(vec![json_to_sql(scalar)]),
        }
    }
}

fn named_placeholder(key: &str) -> String {
    if key.starts_with([':', '@', '$']) {
        key.to_string()
    } else {
        format!(":{}", key)
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}
