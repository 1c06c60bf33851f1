use crate::{Error, Level, Logger, Result, SharedLogLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global subscriber that writes `tracing` events through `logger`.
///
/// `RUST_LOG` takes precedence; otherwise the logger's level, raised by
/// `cli_verbose`, selects which events are recorded.
pub fn init_logging(logger: &Logger, level: Level, cli_verbose: Option<u8>) -> Result<()> {
    let filter = effective_filter(level, cli_verbose);
    let env_filter = EnvFilter::try_new(&filter).map_err(|e| Error::Init(e.to_string()))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(SharedLogLayer::new(logger.clone()))
        .try_init()
        .map_err(|e| Error::Init(e.to_string()))?;

    Ok(())
}

/// Determine the effective filter directive.
fn effective_filter(level: Level, cli_verbose: Option<u8>) -> String {
    if let Ok(rust_log) = std::env::var("RUST_LOG")
        && !rust_log.is_empty()
    {
        return rust_log;
    }

    match cli_verbose {
        None | Some(0) => directive(level).to_string(),
        Some(1) => "debug".to_string(),
        Some(_) => "trace".to_string(),
    }
}

fn directive(level: Level) -> &'static str {
    match level {
        Level::Debug => "debug",
        Level::Log | Level::Info => "info",
        Level::Warn => "warn",
        Level::Error => "error",
    }
}
