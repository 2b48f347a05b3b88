//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    AggregatorConfig, JunctionConfig, LogOutput, LoggingConfig, ReaperConfig, ScatterGatherConfig,
    StoreConfig, StoreKind,
};

/// Validates the entire configuration.
pub fn validate_config(config: &JunctionConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_aggregator_config(&config.aggregator)?;
    validate_scatter_gather_config(&config.scatter_gather)?;
    validate_reaper_config(&config.reaper)?;
    validate_store_config(&config.store)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File
        && logging
            .file_path
            .as_ref()
            .is_none_or(|path| path.as_os_str().is_empty())
    {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_aggregator_config(aggregator: &AggregatorConfig) -> ConfigResult<()> {
    if aggregator.group_timeout_ms == Some(0) {
        return Err(ConfigError::validation(
            "aggregator.group_timeout_ms must be greater than 0",
        ));
    }
    if aggregator.send_timeout_ms == Some(0) {
        return Err(ConfigError::validation(
            "aggregator.send_timeout_ms must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_scatter_gather_config(scatter_gather: &ScatterGatherConfig) -> ConfigResult<()> {
    if scatter_gather.gather_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "scatter_gather.gather_timeout_ms must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_reaper_config(reaper: &ReaperConfig) -> ConfigResult<()> {
    if reaper.interval_ms == 0 {
        return Err(ConfigError::validation(
            "reaper.interval_ms must be greater than 0",
        ));
    }
    if reaper.timeout_ms == 0 {
        return Err(ConfigError::validation(
            "reaper.timeout_ms must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_store_config(store: &StoreConfig) -> ConfigResult<()> {
    if store.group_capacity == Some(0) {
        return Err(ConfigError::validation(
            "store.group_capacity must be greater than 0",
        ));
    }
    match store.kind {
        StoreKind::Memory => Ok(()),
        StoreKind::File => {
            if store
                .directory
                .as_ref()
                .is_none_or(|dir| dir.as_os_str().is_empty())
            {
                return Err(ConfigError::missing_field("store.directory"));
            }
            if store.group_capacity.is_some() {
                return Err(ConfigError::validation(
                    "store.group_capacity is only supported by the memory store",
                ));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&JunctionConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        let mut config = JunctionConfig::default();
        config.scatter_gather.gather_timeout_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = JunctionConfig::default();
        config.reaper.interval_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = JunctionConfig::default();
        config.aggregator.group_timeout_ms = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_store_requires_directory() {
        let mut config = JunctionConfig::default();
        config.store.kind = StoreKind::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "store.directory"
        ));

        config.store.directory = Some(PathBuf::new());
        assert!(validate_config(&config).is_err());

        config.store.directory = Some(PathBuf::from("/var/lib/junction"));
        assert!(validate_config(&config).is_ok());

        config.store.group_capacity = Some(10);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_logging_requires_path() {
        let mut config = JunctionConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
        config.logging.file_path = Some(PathBuf::from("junction.log"));
        assert!(validate_config(&config).is_ok());
    }
}
