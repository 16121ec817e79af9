use super::models::Config;
use crate::humanize::ByteSize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Hard ceiling for `server.api.max_payload_bytes`
const MAX_PAYLOAD_LIMIT: ByteSize = ByteSize(1024 * 1024);

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_payload_bytes ({actual}) exceeds limit of 1MB ({limit})")]
    PayloadSizeExceedsLimit { actual: u64, limit: u64 },

    #[error("max_locator_bytes ({locator}) must be positive and fit in max_payload_bytes ({payload})")]
    InvalidLocatorLimit { locator: usize, payload: u64 },

    #[error("archive_suffix must be non-empty and contain no path separators: {0:?}")]
    InvalidArchiveSuffix(String),

    #[error("Interval must be positive: {field} = {value}")]
    InvalidInterval { field: String, value: u64 },

    #[error("Simulated engine must make progress: bytes_per_poll = 0")]
    StalledSimulation,

    #[error("Retention TTL must be positive: {field} = {value}")]
    InvalidRetentionTTL { field: String, value: u32 },

    #[error("Invalid log filter {filter:?}: {reason}")]
    InvalidLogFilter { filter: String, reason: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_api_limits(config)?;
    validate_downloads(config)?;
    validate_engine(config)?;
    validate_retention(config)?;
    validate_telemetry(config)?;
    Ok(())
}

fn validate_api_limits(config: &Config) -> Result<(), ValidationError> {
    let payload = config.server.api.max_payload_bytes;
    if payload > MAX_PAYLOAD_LIMIT {
        return Err(ValidationError::PayloadSizeExceedsLimit {
            actual: payload.as_u64(),
            limit: MAX_PAYLOAD_LIMIT.as_u64(),
        });
    }

    let locator = config.server.api.max_locator_bytes;
    if locator == 0 || locator as u64 > payload.as_u64() {
        return Err(ValidationError::InvalidLocatorLimit {
            locator,
            payload: payload.as_u64(),
        });
    }

    Ok(())
}

fn validate_downloads(config: &Config) -> Result<(), ValidationError> {
    let downloads = &config.downloads;

    let suffix = &downloads.archive_suffix;
    if suffix.is_empty() || suffix.contains(['/', '\\']) {
        return Err(ValidationError::InvalidArchiveSuffix(suffix.clone()));
    }

    for (field, value) in [
        ("metadata_poll_interval_ms", downloads.metadata_poll_interval_ms),
        ("download_poll_interval_ms", downloads.download_poll_interval_ms),
        ("metadata_timeout_secs", downloads.metadata_timeout_secs),
    ] {
        if value == 0 {
            return Err(ValidationError::InvalidInterval {
                field: field.to_string(),
                value,
            });
        }
    }

    Ok(())
}

fn validate_engine(config: &Config) -> Result<(), ValidationError> {
    if config.engine.simulated.bytes_per_poll.as_u64() == 0 {
        return Err(ValidationError::StalledSimulation);
    }
    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.idempotency_ttl_days == 0 {
        return Err(ValidationError::InvalidRetentionTTL {
            field: "idempotency_ttl_days".to_string(),
            value: 0,
        });
    }
    Ok(())
}

fn validate_telemetry(config: &Config) -> Result<(), ValidationError> {
    let filter = &config.telemetry.log_filter;
    EnvFilter::try_new(filter).map_err(|err| ValidationError::InvalidLogFilter {
        filter: filter.clone(),
        reason: err.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_payload_size_limit() {
        let mut config = Config::default();
        config.server.api.max_payload_bytes = ByteSize(2 * 1024 * 1024);

        assert!(matches!(
            validate(&config),
            Err(ValidationError::PayloadSizeExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_locator_limit_must_fit_payload() {
        let mut config = Config::default();
        config.server.api.max_locator_bytes = 128 * 1024;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLocatorLimit { .. })
        ));

        config.server.api.max_locator_bytes = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_archive_suffix() {
        let mut config = Config::default();
        config.downloads.archive_suffix = "/../x.zip".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidArchiveSuffix(_))
        ));

        config.downloads.archive_suffix = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_interval() {
        let mut config = Config::default();
        config.downloads.download_poll_interval_ms = 0;

        match validate(&config) {
            Err(ValidationError::InvalidInterval { field, .. }) => {
                assert_eq!(field, "download_poll_interval_ms")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_stalled_simulation() {
        let mut config = Config::default();
        config.engine.simulated.bytes_per_poll = ByteSize(0);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::StalledSimulation)
        ));
    }

    #[test]
    fn test_zero_retention_ttl() {
        let mut config = Config::default();
        config.retention.idempotency_ttl_days = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetentionTTL { .. })
        ));
    }

    #[test]
    fn test_invalid_log_filter() {
        let mut config = Config::default();
        config.telemetry.log_filter = "seedbox=notalevel".to_string();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLogFilter { .. })
        ));
    }
}
