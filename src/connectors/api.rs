use super::{
    BundleMetadata, Connector, ConnectorDetails, ConnectorError, ConnectorInfo, ConnectorKind,
    FetchResult, LinkState, ResultBundle,
};
use crate::config::ApiConfig;
use crate::metrics::ConnectorMetrics;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// Connector over a REST API, holding one reusable HTTP session.
pub struct ApiConnector {
    name: String,
    config: ApiConfig,
    session: Mutex<Option<Client>>,
    link: LinkState,
}

/// Verbs the connector dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl FromStr for HttpMethod {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(ConnectorError::UnsupportedMethod {
                method: other.to_string(),
            }),
        }
    }
}

impl From<HttpMethod> for Method {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// Shape of the `params` argument accepted by [`ApiConnector::fetch_data`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RequestParams {
    method: Option<String>,
    #[serde(alias = "data")]
    body: Option<Value>,
    query_params: Option<BTreeMap<String, Value>>,
}

impl RequestParams {
    fn from_json(params: Option<&Value>) -> Result<Self, ConnectorError> {
        match params {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value @ Value::Object(_)) => Self::deserialize(value)
                .map_err(|e| ConnectorError::InvalidParams(e.to_string())),
            Some(other) => Err(ConnectorError::InvalidParams(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    fn method(&self) -> Result<HttpMethod, ConnectorError> {
        self.method.as_deref().unwrap_or("GET").parse()
    }

    /// Query pairs; non-string values are sent in their JSON text form.
    fn query_pairs(&self) -> Vec<(String, String)> {
        self.query_params
            .iter()
            .flatten()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect()
    }
}

/// Join base and endpoint with exactly one separating slash.
pub fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

impl ApiConnector {
    pub fn new(name: impl Into<String>, config: ApiConfig) -> Self {
        let name = name.into();
        info!(connector = %name, base_url = %config.base_url, "Initializing API connector");
        Self {
            name,
            config,
            session: Mutex::new(None),
            link: LinkState::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.timeout)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(10))
    }

    fn default_headers(&self) -> Result<HeaderMap, ConnectorError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.config.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                ConnectorError::Configuration(format!("invalid header name '{}': {}", key, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ConnectorError::Configuration(format!("invalid value for header '{}': {}", key, e))
            })?;
            headers.insert(name, value);
        }

        if let Some(token) = self.config.auth_token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                ConnectorError::Configuration(format!("invalid auth token: {}", e))
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Build the session. No request is sent.
    fn build_session(&self) -> Result<Client, ConnectorError> {
        Url::parse(&self.config.base_url).map_err(|e| {
            ConnectorError::Configuration(format!(
                "invalid base address '{}': {}",
                self.config.base_url, e
            ))
        })?;

        Client::builder()
            .default_headers(self.default_headers()?)
            .timeout(self.timeout())
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("failed to build HTTP session: {}", e)))
    }

    /// Connect while the caller already holds the session lock.
    fn connect_locked(&self, slot: &mut Option<Client>) -> bool {
        if slot.is_some() && self.link.is_connected() {
            return true;
        }
        match self.build_session() {
            Ok(client) => {
                *slot = Some(client);
                self.link.mark_connected();
                info!(connector = %self.name, base_url = %self.config.base_url, "API session created");
                true
            }
            Err(e) => {
                *slot = None;
                self.link.mark_disconnected();
                error!(connector = %self.name, "Failed to create API session: {}", e);
                false
            }
        }
    }

    /// Session handle for one request. The client is safe to share across
    /// tasks, so the lock only guards its lifecycle.
    async fn session(&self) -> Option<Client> {
        let mut slot = self.session.lock().await;
        if !self.connect_locked(&mut slot) {
            return None;
        }
        slot.clone()
    }

    async fn execute(
        &self,
        client: &Client,
        url: &str,
        method: HttpMethod,
        request: &RequestParams,
    ) -> FetchResult {
        let mut builder = client.request(method.into(), url);
        let query = request.query_pairs();
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if matches!(method, HttpMethod::Post | HttpMethod::Put) {
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
        }

        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let text = response.text().await?;
        let execution_time = start.elapsed();

        if status.is_client_error() || status.is_server_error() {
            return Err(ConnectorError::HttpStatus {
                status_code: status.as_u16(),
                response_body: text,
            });
        }

        // Not every valid response is JSON; fall back to the raw body.
        let data = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ResultBundle {
            data,
            execution_time,
            metadata: BundleMetadata::Api {
                status_code: status.as_u16(),
                content_type,
                headers,
            },
        })
    }
}

#[async_trait]
impl Connector for ApiConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Api
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn connect(&self) -> bool {
        let mut slot = self.session.lock().await;
        self.connect_locked(&mut slot)
    }

    async fn disconnect(&self) -> bool {
        let mut slot = self.session.lock().await;
        if slot.take().is_some() {
            info!(connector = %self.name, "API session closed");
        }
        self.link.mark_disconnected();
        true
    }

    #[instrument(skip(self, params), fields(connector = %self.name))]
    async fn fetch_data(&self, endpoint: &str, params: Option<&Value>) -> FetchResult {
        let Some(client) = self.session().await else {
            return Err(ConnectorError::NotConnected);
        };

        let request = RequestParams::from_json(params)?;
        let method = match request.method() {
            Ok(method) => method,
            Err(e) => {
                warn!("Rejected request: {}", e);
                return Err(e);
            }
        };
        let url = join_url(&self.config.base_url, endpoint);

        let start = Instant::now();
        let result = self.execute(&client, &url, method, &request).await;
        ConnectorMetrics::record_fetch(
            &self.name,
            ConnectorKind::Api.as_str(),
            start.elapsed(),
            result.as_ref().err().map(ConnectorError::kind),
        );

        if let Err(e) = &result {
            match e {
                ConnectorError::Timeout => error!("Timeout while requesting {}", url),
                ConnectorError::Connection(detail) => {
                    error!("Connection error for {}: {}", url, detail)
                }
                ConnectorError::HttpStatus { status_code, .. } => {
                    error!("HTTP {} for {}", status_code, url)
                }
                other => error!("API request to {} failed: {}", url, other),
            }
        }
        result
    }

    async fn test_connection(&self) -> bool {
        match self.fetch_data("/", None).await {
            Ok(bundle) => bundle.status_code().is_some_and(|code| code < 400),
            Err(_) => false,
        }
    }

    fn get_info(&self) -> ConnectorInfo {
        ConnectorInfo {
            name: self.name.clone(),
            kind: ConnectorKind::Api,
            is_connected: self.link.is_connected(),
            connected_at: self.link.connected_at(),
            details: ConnectorDetails::Api {
                base_url: self.config.base_url.clone(),
                timeout_seconds: self.timeout().as_secs_f64(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connector(base_url: &str) -> ApiConnector {
        ApiConnector::new(
            "upstream",
            ApiConfig {
                base_url: base_url.to_string(),
                ..ApiConfig::default()
            },
        )
    }

    #[test]
    fn test_join_url_normalizes_slashes() {
        assert_eq!(join_url("http://h/api/", "/v1/kpi"), "http://h/api/v1/kpi");
        assert_eq!(join_url("http://h/api", "v1/kpi"), "http://h/api/v1/kpi");
        assert_eq!(join_url("http://h//", "//x"), "http://h/x");
        assert_eq!(join_url("http://h", "/"), "http://h/");
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("Delete".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert_eq!(
            "patch".parse::<HttpMethod>().unwrap_err(),
            ConnectorError::UnsupportedMethod {
                method: "PATCH".to_string()
            }
        );
    }

    #[test]
    fn test_request_params() {
        let params = RequestParams::from_json(Some(&json!({
            "method": "post",
            "data": { "a": 1 },
            "query_params": { "week": 2, "view": "monthly" }
        })))
        .unwrap();
        assert_eq!(params.method().unwrap(), HttpMethod::Post);
        assert_eq!(params.body, Some(json!({ "a": 1 })));
        assert_eq!(
            params.query_pairs(),
            vec![
                ("view".to_string(), "monthly".to_string()),
                ("week".to_string(), "2".to_string())
            ]
        );

        assert!(matches!(
            RequestParams::from_json(Some(&json!(["GET"]))),
            Err(ConnectorError::InvalidParams(_))
        ));
        assert_eq!(
            RequestParams::from_json(None).unwrap().method().unwrap(),
            HttpMethod::Get
        );
    }

    #[tokio::test]
    async fn test_connect_never_touches_network() {
        // port 9 (discard) is never expected to answer; connect must still succeed
        let api = connector("http://127.0.0.1:9/api");
        assert!(api.connect().await);
        assert!(api.is_connected());
        assert!(api.connect().await);
        assert!(api.disconnect().await);
        assert!(!api.is_connected());
        assert!(api.disconnect().await);
    }

    #[tokio::test]
    async fn test_malformed_base_url_fails_connect() {
        for base in ["", "not a url"] {
            let api = connector(base);
            assert!(!api.connect().await);
            let result = api.fetch_data("/kpi", None).await;
            assert_eq!(result.unwrap_err(), ConnectorError::NotConnected);
            assert!(!api.is_connected());
        }
    }

    #[tokio::test]
    async fn test_invalid_header_fails_connect() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let api = ApiConnector::new(
            "upstream",
            ApiConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                headers,
                ..ApiConfig::default()
            },
        );
        assert!(!api.connect().await);
    }

    #[tokio::test]
    async fn test_unsupported_method_is_rejected_before_network() {
        let api = connector("http://127.0.0.1:9");
        let result = api
            .fetch_data("/kpi", Some(&json!({ "method": "PATCH" })))
            .await;
        assert_eq!(result.unwrap_err().to_string(), "unsupported method");
    }

    #[test]
    fn test_get_info_and_timeout_defaults() {
        let api = connector("http://h");
        assert_eq!(api.timeout(), Duration::from_secs(10));
        let info = api.get_info();
        assert_eq!(info.kind, ConnectorKind::Api);
        assert_eq!(
            info.details,
            ConnectorDetails::Api {
                base_url: "http://h".to_string(),
                timeout_seconds: 10.0
            }
        );

        let fractional = ApiConnector::new(
            "fast",
            ApiConfig {
                timeout: 0.5,
                ..ApiConfig::default()
            },
        );
        assert_eq!(fractional.timeout(), Duration::from_millis(500));
    }
}
