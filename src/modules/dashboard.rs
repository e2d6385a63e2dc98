//! Main security KPI dashboard.

use super::{FeatureModule, ModuleDescriptor};
use crate::connectors::{result_to_json, ConnectorKind};
use crate::server::AppState;
use axum::{
    extract::{Query, State},
    http::{header::CACHE_CONTROL, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, warn};

pub const DASHBOARD_ID: &str = "dashboard";

pub struct DashboardModule;

impl FeatureModule for DashboardModule {
    fn id(&self) -> &'static str {
        DASHBOARD_ID
    }

    fn module_info(&self) -> Option<anyhow::Result<ModuleDescriptor>> {
        Some(Ok(ModuleDescriptor {
            title: "Dashboard".to_string(),
            description: "Main security KPI dashboard".to_string(),
            enabled: true,
            icon: "dashboard".to_string(),
            order: 1,
        }))
    }

    fn routes(&self) -> Option<Router<AppState>> {
        Some(Router::new().route("/api/dashboard/data", get(dashboard_data)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayType {
    Total,
    Average,
}

/// Raw query string of `/api/dashboard/data`; numbers stay text so a bad value
/// gets our JSON error instead of the extractor's rejection.
#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub view_type: Option<String>,
    pub display_type: Option<String>,
    pub week: Option<String>,
    pub month: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardFilters {
    pub view_type: ViewType,
    pub display_type: DisplayType,
    pub week: u32,
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, PartialEq)]
pub enum FilterError {
    InvalidNumber,
    ViewType,
    DisplayType,
    Week,
    Month,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FilterError::InvalidNumber => "invalid numeric parameters",
            FilterError::ViewType => "invalid view type",
            FilterError::DisplayType => "invalid display type",
            FilterError::Week => "invalid week number",
            FilterError::Month => "invalid month number",
        };
        f.write_str(msg)
    }
}

fn parse_number<T: std::str::FromStr>(raw: Option<&str>, default: T) -> Result<T, FilterError> {
    match raw {
        None => Ok(default),
        Some(s) => s.trim().parse().map_err(|_| FilterError::InvalidNumber),
    }
}

impl DashboardFilters {
    /// Validate the query; missing values default to monthly/total, week 1 and
    /// the month and year of `today`.
    pub fn parse(query: &DashboardQuery, today: NaiveDate) -> Result<Self, FilterError> {
        let week: u32 = parse_number(query.week.as_deref(), 1)?;
        let month: u32 = parse_number(query.month.as_deref(), today.month())?;
        let year: i32 = parse_number(query.year.as_deref(), today.year())?;

        let view_type = match query.view_type.as_deref().unwrap_or("monthly") {
            "weekly" => ViewType::Weekly,
            "monthly" => ViewType::Monthly,
            "yearly" => ViewType::Yearly,
            _ => return Err(FilterError::ViewType),
        };
        let display_type = match query.display_type.as_deref().unwrap_or("total") {
            "total" => DisplayType::Total,
            "average" => DisplayType::Average,
            _ => return Err(FilterError::DisplayType),
        };
        if !(1..=4).contains(&week) {
            return Err(FilterError::Week);
        }
        if !(1..=12).contains(&month) {
            return Err(FilterError::Month);
        }

        Ok(Self {
            view_type,
            display_type,
            week,
            month,
            year,
        })
    }

    /// Fetch params for the configured source: named binds for SQL, query
    /// string for an API.
    pub fn to_params(&self, kind: ConnectorKind) -> Value {
        let filters = json!(self);
        match kind {
            ConnectorKind::Sql => filters,
            ConnectorKind::Api => json!({ "method": "GET", "query_params": filters }),
        }
    }
}

fn json_error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

async fn dashboard_data(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    if !state.registry.is_module_enabled(DASHBOARD_ID) {
        return json_error(StatusCode::NOT_FOUND, json!({ "error": "module disabled" }));
    }

    let filters = match DashboardFilters::parse(&query, Local::now().date_naive()) {
        Ok(filters) => filters,
        Err(e) => {
            debug!("Rejected dashboard filters: {}", e);
            return json_error(StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }));
        }
    };

    let dashboard = &state.config.dashboard;
    let (Some(source), Some(request)) = (dashboard.source.as_deref(), dashboard.query.as_deref())
    else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "no data source configured for dashboard", "filters": filters }),
        );
    };
    let Some(connector) = state.data_sources.get(source) else {
        warn!("Dashboard data source '{}' is not configured", source);
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": format!("unknown data source: {}", source), "filters": filters }),
        );
    };

    let params = filters.to_params(connector.kind());
    let result = connector.fetch_data(request, Some(&params)).await;

    let mut body = result_to_json(&result);
    body["filters"] = json!(filters);
    let status = if result.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    let cache = format!("max-age={}", state.config.app.cache_timeout);
    (status, [(CACHE_CONTROL, cache)], Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn query(pairs: &[(&str, &str)]) -> DashboardQuery {
        let mut q = DashboardQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "view_type" => q.view_type = value,
                "display_type" => q.display_type = value,
                "week" => q.week = value,
                "month" => q.month = value,
                "year" => q.year = value,
                _ => unreachable!(),
            }
        }
        q
    }

    #[test]
    fn test_defaults() {
        let filters = DashboardFilters::parse(&query(&[]), today()).unwrap();
        assert_eq!(
            filters,
            DashboardFilters {
                view_type: ViewType::Monthly,
                display_type: DisplayType::Total,
                week: 1,
                month: 3,
                year: 2024,
            }
        );
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            (vec![("week", "two")], FilterError::InvalidNumber),
            (vec![("view_type", "daily")], FilterError::ViewType),
            (vec![("display_type", "median")], FilterError::DisplayType),
            (vec![("week", "5")], FilterError::Week),
            (vec![("month", "0")], FilterError::Month),
        ];
        for (pairs, expected) in cases {
            assert_eq!(
                DashboardFilters::parse(&query(&pairs), today()).unwrap_err(),
                expected
            );
        }
    }

    #[test]
    fn test_params_by_connector_kind() {
        let filters = DashboardFilters::parse(
            &query(&[("view_type", "yearly"), ("year", "2023")]),
            today(),
        )
        .unwrap();

        let sql = filters.to_params(ConnectorKind::Sql);
        assert_eq!(sql["view_type"], "yearly");
        assert_eq!(sql["year"], 2023);

        let api = filters.to_params(ConnectorKind::Api);
        assert_eq!(api["method"], "GET");
        assert_eq!(api["query_params"]["display_type"], "total");
    }

    #[test]
    fn test_descriptor() {
        let descriptor = DashboardModule.module_info().unwrap().unwrap();
        assert_eq!(descriptor.order, 1);
        assert_eq!(descriptor.icon, "dashboard");
        assert!(DashboardModule.routes().is_some());
    }
}
