use serde_json::{json, Value};
use thiserror::Error;

/// Failure half of a connector fetch.
///
/// Every failure a connector can hit is folded into one of these variants and
/// handed back as a value; nothing crosses the connector boundary as a panic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectorError {
    /// The lazy connect attempt made by `fetch_data` failed.
    #[error("not connected")]
    NotConnected,

    /// Unsupported engine, malformed base address, bad header.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("timeout")]
    Timeout,

    #[error("connection error")]
    Connection(String),

    /// The upstream answered with a status >= 400.
    #[error("HTTP error {status_code}")]
    HttpStatus {
        status_code: u16,
        response_body: String,
    },

    #[error("unsupported method")]
    UnsupportedMethod { method: String },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Syntax error, constraint violation, locked database.
    #[error("{0}")]
    Query(String),

    #[error("{0}")]
    Request(String),
}

impl ConnectorError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ConnectorError::HttpStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Error-shaped body handed to the boundary layer: `{error, status_code?, response_body?}`.
    pub fn to_body(&self) -> Value {
        let mut body = json!({ "error": self.to_string() });
        if let ConnectorError::HttpStatus {
            status_code,
            response_body,
        } = self
        {
            body["status_code"] = json!(status_code);
            body["response_body"] = json!(response_body);
        }
        body
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorError::NotConnected => "not_connected",
            ConnectorError::Configuration(_) => "configuration",
            ConnectorError::Timeout => "timeout",
            ConnectorError::Connection(_) => "connection",
            ConnectorError::HttpStatus { .. } => "http_status",
            ConnectorError::UnsupportedMethod { .. } => "unsupported_method",
            ConnectorError::InvalidParams(_) => "invalid_params",
            ConnectorError::Query(_) => "query",
            ConnectorError::Request(_) => "request",
        }
    }
}

impl From<rusqlite::Error> for ConnectorError {
    fn from(e: rusqlite::Error) -> Self {
        ConnectorError::Query(e.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ConnectorError::Timeout
        } else if e.is_connect() {
            ConnectorError::Connection(e.to_string())
        } else {
            ConnectorError::Request(e.to_string())
        }
    }
}
