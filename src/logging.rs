use std::fs;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

const CRATE_TARGET: &str = "kpi_server";

/// Initializes the logging system with both console and file output.
///
/// `level` comes from `app.log_level` and becomes the default directive for this
/// crate; `RUST_LOG` still takes precedence for anything it names. An
/// unrecognized level falls back to `info` for this crate only.
pub fn init_logging(level: &str) {
    // Ensure logs directory exists
    let _ = fs::create_dir_all("logs");

    // Create a non-blocking file appender for daily log rotation
    let file_appender = tracing_appender::rolling::daily("logs", "kpi_server.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Create a JSON layer for file logging
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    // Create a formatted layer for console logging
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let parsed = parse_level(level);
    let directive = crate_directive(parsed.unwrap_or(LevelFilter::INFO));

    // try_init so a second call (tests, embedded use) is harmless
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(directive))
        .with(file_layer)
        .with(console_layer)
        .try_init();

    if parsed.is_none() {
        warn!("Unrecognized log level '{}', using info", level);
    }

    // We need to keep the guard alive to ensure logs are flushed on exit
    std::mem::forget(guard);
}

/// Parse a configured level. Accepts the tracing names plus the `WARNING` and
/// `CRITICAL` spellings used by older settings files.
fn parse_level(level: &str) -> Option<LevelFilter> {
    let level = level.trim().to_ascii_lowercase();
    let level = match level.as_str() {
        "warning" => "warn",
        "critical" => "error",
        other => other,
    };
    level.parse().ok()
}

fn crate_directive(level: LevelFilter) -> Directive {
    format!("{}={}", CRATE_TARGET, level)
        .parse()
        .unwrap_or_else(|_| Directive::from(level))
}
