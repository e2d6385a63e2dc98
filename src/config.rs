use crate::error::{AppError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppSettings,
    /// Named data sources, each turned into one connector at startup.
    pub data_sources: BTreeMap<String, DataSourceConfig>,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Seconds, advertised as `Cache-Control: max-age` on module data responses.
    pub cache_timeout: u64,
    /// When false the built-in module catalog is not scanned.
    pub modules_enabled: bool,
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            cache_timeout: 300,
            modules_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Name of the data source under `[data_sources]` feeding the dashboard.
    pub source: Option<String>,
    /// Query (SQL) or endpoint (API) run against that source.
    pub query: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataSourceConfig {
    Sql(SqlConfig),
    Api(ApiConfig),
}

/// Settings for the SQL connector. `USER`, `PASSWORD`, `HOST` and `PORT` are
/// only meaningful for server engines and are ignored by the embedded one.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SqlConfig {
    #[serde(rename = "ENGINE", default = "default_engine")]
    pub engine: String,
    #[serde(rename = "NAME", default = "default_database")]
    pub name: String,
    #[serde(rename = "USER", default)]
    pub user: Option<String>,
    #[serde(rename = "PASSWORD", default)]
    pub password: Option<String>,
    #[serde(rename = "HOST", default)]
    pub host: Option<String>,
    #[serde(rename = "PORT", default)]
    pub port: Option<u16>,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            name: default_database(),
            user: None,
            password: None,
            host: None,
            port: None,
        }
    }
}

fn default_engine() -> String {
    "sqlite".to_string()
}

fn default_database() -> String {
    ":memory:".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(rename = "BASE_URL", default)]
    pub base_url: String,
    #[serde(rename = "AUTH_TOKEN", default)]
    pub auth_token: Option<String>,
    /// Seconds; fractional values are allowed.
    #[serde(rename = "TIMEOUT", default = "default_timeout")]
    pub timeout: f64,
    #[serde(rename = "HEADERS", default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_token: None,
            timeout: default_timeout(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_timeout() -> f64 {
    10.0
}

impl Config {
    /// Loads `.env`, then the TOML file, then applies `KPI_*` environment overrides.
    ///
    /// An explicitly requested file (argument or `KPI_CONFIG`) must exist; the
    /// default `config.toml` falls back to built-in defaults when absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("KPI_CONFIG").ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
                    Config::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Applies `KPI_HOST`, `KPI_PORT` and `KPI_LOG_LEVEL` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("KPI_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("KPI_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| AppError::Config(format!("Invalid KPI_PORT value: '{}'", port)))?;
        }
        if let Some(level) = lookup("KPI_LOG_LEVEL") {
            self.app.log_level = level;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.app.cache_timeout, 300);
        assert!(config.app.modules_enabled);
        assert!(config.data_sources.is_empty());
    }

    #[test]
    fn test_parses_data_sources_with_recognized_keys() {
        let config = Config::from_toml_str(
            r#"
            [server]
            port = 8080

            [data_sources.kpi]
            type = "sql"
            ENGINE = "sqlite"
            NAME = "data/security_kpi.db"

            [data_sources.tickets]
            type = "api"
            BASE_URL = "https://tickets.example.com/api"
            AUTH_TOKEN = "secret"
            TIMEOUT = 5
            HEADERS = { "X-Client" = "kpi" }

            [dashboard]
            source = "kpi"
            query = "SELECT 1"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        match &config.data_sources["kpi"] {
            DataSourceConfig::Sql(sql) => {
                assert_eq!(sql.engine, "sqlite");
                assert_eq!(sql.name, "data/security_kpi.db");
                assert!(sql.port.is_none());
            }
            other => panic!("expected sql source, got {:?}", other),
        }
        match &config.data_sources["tickets"] {
            DataSourceConfig::Api(api) => {
                assert_eq!(api.base_url, "https://tickets.example.com/api");
                assert_eq!(api.auth_token.as_deref(), Some("secret"));
                assert_eq!(api.timeout, 5.0);
                assert_eq!(api.headers["X-Client"], "kpi");
            }
            other => panic!("expected api source, got {:?}", other),
        }
        assert_eq!(config.dashboard.source.as_deref(), Some("kpi"));
    }

    #[test]
    fn test_api_source_defaults() {
        let config = Config::from_toml_str(
            r#"
            [data_sources.upstream]
            type = "api"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.data_sources["upstream"],
            DataSourceConfig::Api(ApiConfig::default())
        );
    }

    #[test]
    fn test_unknown_source_type_is_rejected() {
        let result = Config::from_toml_str(
            r#"
            [data_sources.bad]
            type = "ftp"
            "#,
        );
        assert!(matches!(result, Err(AppError::Toml(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(|key| match key {
                "KPI_PORT" => Some("9000".to_string()),
                "KPI_LOG_LEVEL" => Some("debug".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.app.log_level, "debug");

        let err = config
            .apply_overrides(|key| (key == "KPI_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[app]\nmodules_enabled = false").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert!(!config.app.modules_enabled);
        assert_eq!(config.app.log_level, "info");

        let missing = Config::from_file(Path::new("/nonexistent/kpi.toml"));
        assert!(matches!(missing, Err(AppError::Config(_))));
    }
}
