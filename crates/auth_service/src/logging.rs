//! Logging setup for the auth service.

use greatestworks_config::LoggingSettings;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies.
///
/// # Arguments
/// * `settings` - Logging section of the initial configuration snapshot
///
/// # Returns
/// * `anyhow::Result<()>` - Fails if a global subscriber is already installed
pub fn setup_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));

    if settings.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test in this binary that installs a global subscriber.
    #[test]
    fn test_second_init_fails_instead_of_panicking() {
        let mut settings = LoggingSettings::default();
        settings.json_format = true;
        assert!(setup_logging(&settings).is_ok());

        settings.json_format = false;
        let second = setup_logging(&settings);
        assert!(second.is_err(), "a second global subscriber was installed");
    }
}
