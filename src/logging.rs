//! Subscriber setup for binaries embedding the engine.
//!
//! The library itself only emits `tracing` events; nothing is printed until a
//! subscriber is installed.

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a global subscriber. `RUST_LOG` takes precedence over `level`.
///
/// `format` is `"pretty"`, `"json"` or `"compact"`.
pub fn init(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to install json log subscriber")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to install pretty log subscriber")?,
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .try_init()
            .context("failed to install compact log subscriber")?,
        other => bail!("unsupported log format: {other}"),
    }

    Ok(())
}
