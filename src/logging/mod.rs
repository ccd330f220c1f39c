// Tracing setup
//
// The library only emits `tracing` events; binaries and tests decide
// whether to install a subscriber.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides `config.filter`. Returns false if a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = LoggingConfig {
            ansi: false,
            ..LoggingConfig::default()
        };
        // The first call may lose to another test's subscriber; the second
        // can never succeed.
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
