use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Error, Result};

/// Install the engine's tracing subscriber.
///
/// Level comes from `RUST_LOG`, defaulting to `info`. Logs go to stderr so
/// they never mix with machine-readable output on stdout. Fails instead of
/// panicking when a global subscriber is already set.
pub fn init() -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .compact();

    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error_not_a_panic() {
        let _ = init();
        assert!(matches!(init(), Err(Error::Logging(_))));
        tracing::info!(extension = "logging", "Subscriber installed");
    }
}
