//! Feature modules and the registry that catalogs them.
//!
//! Modules take part in discovery by appearing in [`builtin_modules`], the
//! registration table scanned by [`ModuleRegistry::discover_modules`].

pub mod dashboard;
pub mod registry;
pub mod tickets;

pub use registry::ModuleRegistry;

use crate::server::AppState;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Order given to modules that do not provide their own descriptor.
pub const DEFAULT_ORDER: i64 = 999;

/// Metadata describing a feature module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub title: String,
    pub description: String,
    pub enabled: bool,
    pub icon: String,
    /// Lower sorts first
    pub order: i64,
}

impl ModuleDescriptor {
    /// Descriptor synthesized for a module without a descriptor entry point.
    pub fn default_for(id: &str) -> Self {
        Self {
            title: capitalize(id),
            description: format!("Module {}", id),
            enabled: true,
            icon: "module".to_string(),
            order: DEFAULT_ORDER,
        }
    }
}

/// A descriptor together with its registry id, as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    #[serde(flatten)]
    pub descriptor: ModuleDescriptor,
}

/// A self-contained feature unit.
pub trait FeatureModule: Send + Sync {
    /// Registry key of the module
    fn id(&self) -> &'static str;

    /// Descriptor entry point. `None` means the module has none and gets
    /// [`ModuleDescriptor::default_for`]; `Some(Err(_))` makes discovery skip it.
    fn module_info(&self) -> Option<anyhow::Result<ModuleDescriptor>> {
        None
    }

    /// HTTP routes contributed by the module, merged into the server router.
    fn routes(&self) -> Option<Router<AppState>> {
        None
    }
}

/// Registration table of the modules compiled into this server.
pub fn builtin_modules() -> Vec<Arc<dyn FeatureModule>> {
    vec![
        Arc::new(dashboard::DashboardModule),
        Arc::new(tickets::TicketsModule),
    ]
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
