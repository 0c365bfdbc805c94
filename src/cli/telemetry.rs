//! Tracing subscriber setup for the CLI.
//!
//! Verbosity comes from repeated `-v` flags; `RUST_LOG` overrides it when set.
//! JSON output is meant for log aggregation in deployed environments.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init(verbosity_level: Option<tracing::Level>, json_logs: bool) -> Result<()> {
    let env_filter = match verbosity_level {
        Some(level) => EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
        None => EnvFilter::builder()
            .with_default_directive(tracing::Level::ERROR.into())
            .from_env_lossy(),
    };

    if json_logs {
        let fmt_layer = fmt::layer().json().with_target(false);
        let subscriber = Registry::default().with(fmt_layer).with(env_filter);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        let subscriber = Registry::default().with(fmt_layer).with(env_filter);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
