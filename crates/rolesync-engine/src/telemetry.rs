//! Tracing initialisation.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` directives apply first; the configured level is added for
/// the `rolesync` crates. Fails if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(directive(&config.level).parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn directive(level: &str) -> String {
    format!("rolesync={}", level.trim().to_ascii_lowercase())
}
