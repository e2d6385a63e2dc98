use crate::config::Config;
use crate::connectors::DataSources;
use crate::error::{AppError, Result};
use crate::modules::{builtin_modules, ModuleRegistry};
use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, put},
    Router,
};
use hyper::Server;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared context handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModuleRegistry>,
    pub data_sources: Arc<DataSources>,
    pub config: Arc<Config>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the registry and data sources described by `config`.
    ///
    /// With `app.modules_enabled = false` the built-in catalog is not scanned.
    pub fn from_config(config: Config) -> Self {
        let catalog = if config.app.modules_enabled {
            builtin_modules()
        } else {
            info!("Module discovery disabled by configuration");
            Vec::new()
        };
        Self {
            registry: Arc::new(ModuleRegistry::new(catalog)),
            data_sources: Arc::new(DataSources::from_config(&config.data_sources)),
            config: Arc::new(config),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "kpi-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn list_modules(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.get_modules_info())
}

async fn get_module(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.registry.get_module(&id) {
        Some(descriptor) => Json(json!({ "id": id, "module": descriptor })).into_response(),
        None => not_found(format!("module not found: {}", id)),
    }
}

#[derive(Debug, Deserialize)]
struct EnableRequest {
    enabled: bool,
}

async fn set_module_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EnableRequest>,
) -> Response {
    if state.registry.enable_module(&id, req.enabled) {
        Json(json!({ "id": id, "enabled": req.enabled })).into_response()
    } else {
        not_found(format!("module not found: {}", id))
    }
}

async fn list_connectors(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.data_sources.infos())
}

async fn test_connector(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(connector) = state.data_sources.get(&name) else {
        return not_found(format!("data source not found: {}", name));
    };
    let healthy = connector.test_connection().await;
    Json(json!({ "name": name, "healthy": healthy })).into_response()
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

/// Create the router: core endpoints plus the routes of every cataloged module.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/api/modules", get(list_modules))
        .route("/api/modules/:id", get(get_module))
        .route("/api/modules/:id/enabled", put(set_module_enabled))
        .route("/api/connectors", get(list_connectors))
        .route("/api/connectors/:name/test", get(test_connector));

    for module in state.registry.catalog() {
        match module.routes() {
            Some(routes) => {
                info!("Registering routes for module: {}", module.id());
                router = router.merge(routes);
            }
            None => warn!("Module {} has no routes to register", module.id()),
        }
    }

    router
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

/// Serve until Ctrl-C, then release every connector.
pub async fn start_server(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid listen address: {}", e)))?;

    let data_sources = state.data_sources.clone();
    let app = create_router(state);

    info!("HTTP server running on http://{}", addr);
    info!("Modules: http://{}/api/modules", addr);

    Server::try_bind(&addr)
        .map_err(|e| AppError::Server(e.to_string()))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .map_err(|e| AppError::Server(e.to_string()))?;

    for connector in data_sources.iter() {
        connector.disconnect().await;
    }
    Ok(())
}
