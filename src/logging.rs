//! Tracing setup for the `ipvec` binary.
//!
//! Logs go to stderr; stdout is reserved for summaries and `--json` output.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "ipvec=info,warn";

/// Install the global subscriber.
///
/// `log_level` (from `--log-level`) wins over `RUST_LOG`; with neither, our
/// own crate logs at `info` and dependencies at `warn`.
pub fn init_logging(log_level: Option<&str>) -> Result<()> {
    let filter = match log_level {
        Some(level) => level.to_string(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    };
    let env_filter =
        EnvFilter::try_new(&filter).map_err(|e| anyhow!("Invalid log filter '{}': {}", filter, e))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(supports_color());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to init logging: {}", e))?;

    Ok(())
}

fn supports_color() -> bool {
    std::env::var_os("NO_COLOR").is_none() && atty::is(atty::Stream::Stderr)
}
