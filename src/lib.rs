pub mod config;
pub mod connectors;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod modules;
pub mod server;
