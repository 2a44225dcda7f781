//! Tracing setup for binaries

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "GLYPH_LOG";

/// Install the global subscriber
///
/// The filter comes from `GLYPH_LOG` when set, else `default_filter`.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_tracing(
    default_filter: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
