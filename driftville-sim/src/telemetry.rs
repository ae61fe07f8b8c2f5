//! Tracing subscriber setup.

use driftville_core::config::GeneralConfig;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. `RUST_LOG` wins over the configured
/// level; `log_format = "json"` switches to JSON lines.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &GeneralConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_refused() {
        let config = GeneralConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
