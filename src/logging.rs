use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// Installs a global subscriber printing to stderr. `RUST_LOG` takes
/// precedence; otherwise the level follows the debug and verbose settings.
pub fn init(settings: &Settings) -> anyhow::Result<()> {
    let fallback = if settings.debug {
        "debug"
    } else if settings.verbose {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(settings.color)
        .with_target(false)
        .try_init()
        .map_err(anyhow::Error::msg)?;

    Ok(())
}
