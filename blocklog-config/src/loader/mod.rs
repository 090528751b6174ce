//! Settings loading: `.env`, then a config source, then environment
//! overrides, then validation.

pub mod error;

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::models::{Environment, ShipperSettings, ShipperSettingsSource};
use crate::util::{EnvSource, parse_bool, parse_csv, parse_interval};

use error::ConfigLoadError;

/// Validated settings and where they came from.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub settings: ShipperSettings,
    pub source: ShipperSettingsSource,
}

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env: EnvSource,
    env_file: Option<PathBuf>,
    config_path: Option<PathBuf>,
    load_dotenv: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader reading the process environment, after loading `.env` from
    /// the working directory when present.
    pub fn new() -> Self {
        Self {
            env: EnvSource::Process,
            env_file: None,
            config_path: None,
            load_dotenv: true,
        }
    }

    /// Loader reading only the given variables. No `.env` file is loaded.
    pub fn with_env(env: EnvSource) -> Self {
        Self {
            env,
            env_file: None,
            config_path: None,
            load_dotenv: false,
        }
    }

    /// Load this file instead of `./.env`. A missing file is an error.
    ///
    /// With [`EnvSource::Process`] the file is loaded into the process
    /// environment. With [`EnvSource::Map`] its pairs are merged into the
    /// map instead. Either way, variables that are already set win.
    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self.load_dotenv = true;
        self
    }

    /// Read settings from this file, skipping the environment lookup.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env = self.resolve_env()?;

        let loaded = match &self.config_path {
            Some(path) => ShipperSettings::load_from_file(path)
                .map(|settings| (settings, ShipperSettingsSource::File(path.clone()))),
            None => ShipperSettings::load_from_env(&env),
        };
        let (mut settings, source) =
            loaded.map_err(|err| ConfigLoadError::Source(format!("{err:#}")))?;
        apply_env_overrides(&mut settings, &env)?;
        validate(&settings)?;

        info!(
            target: "blocklog::config",
            source = %source,
            environment = %settings.environment,
            destination = %settings.destination,
            directory = %settings.tx_log_directory.display(),
            "loaded shipper settings"
        );
        Ok(ConfigLoad { settings, source })
    }

    fn resolve_env(&self) -> Result<EnvSource, ConfigLoadError> {
        if !self.load_dotenv {
            return Ok(self.env.clone());
        }

        match (&self.env, &self.env_file) {
            (EnvSource::Map(vars), Some(path)) => {
                let mut vars = vars.clone();
                for pair in dotenvy::from_path_iter(path)? {
                    let (name, value) = pair?;
                    vars.entry(name).or_insert(value);
                }
                debug!(target: "blocklog::config", path = %path.display(), "merged env file");
                Ok(EnvSource::Map(vars))
            }
            (EnvSource::Map(_), None) => Ok(self.env.clone()),
            (EnvSource::Process, _) => {
                self.load_dotenv()?;
                Ok(EnvSource::Process)
            }
        }
    }

    fn load_dotenv(&self) -> Result<(), ConfigLoadError> {
        if let Some(path) = &self.env_file {
            dotenvy::from_path(path)?;
            debug!(target: "blocklog::config", path = %path.display(), "loaded env file");
            return Ok(());
        }

        match dotenvy::dotenv() {
            Ok(path) => {
                debug!(target: "blocklog::config", path = %path.display(), "loaded .env");
                Ok(())
            }
            Err(err) if err.not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Apply the environment variables that override individual settings.
///
/// `TX_LOG_S3_BUCKET` may be set to an empty value to disable archiving
/// regardless of the config file.
pub fn apply_env_overrides(
    settings: &mut ShipperSettings,
    env: &EnvSource,
) -> Result<(), ConfigLoadError> {
    if let Some(destination) = env.raw_var("TX_LOG_S3_BUCKET") {
        settings.destination = destination.trim().to_string();
    }

    if let Some(directory) = env.var("TX_LOG_DIRECTORY") {
        settings.tx_log_directory = PathBuf::from(directory);
    }

    if let Some(raw) = env.var("UPLOAD_TASK_INTERVAL") {
        let interval = parse_interval(&raw).ok_or_else(|| ConfigLoadError::InvalidEnv {
            name: "UPLOAD_TASK_INTERVAL",
            message: format!("{raw:?} is not a duration"),
        })?;
        settings.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    }

    if let Some(raw) = env.var("BLOCKLOG_TEMP_MARKERS") {
        settings.temp_markers = parse_csv(&raw);
    }

    if let Some(raw) = env.var("BLOCKLOG_RECURSIVE") {
        settings.recursive = parse_bool(&raw).ok_or_else(|| ConfigLoadError::InvalidEnv {
            name: "BLOCKLOG_RECURSIVE",
            message: format!("{raw:?} is not a boolean"),
        })?;
    }

    if let Some(raw) = env.var("BLOCKLOG_ENV") {
        settings.environment =
            raw.parse::<Environment>()
                .map_err(|message| ConfigLoadError::InvalidEnv {
                    name: "BLOCKLOG_ENV",
                    message,
                })?;
    }

    Ok(())
}

pub fn validate(settings: &ShipperSettings) -> Result<(), ConfigLoadError> {
    if settings.poll_interval_ms == 0 {
        return Err(ConfigLoadError::Invalid(
            "poll_interval_ms must be greater than zero".into(),
        ));
    }
    if settings.stall_warn_ticks == 0 {
        return Err(ConfigLoadError::Invalid(
            "stall_warn_ticks must be greater than zero".into(),
        ));
    }
    if settings.tx_log_directory.as_os_str().is_empty() {
        return Err(ConfigLoadError::Invalid(
            "tx_log_directory must not be empty".into(),
        ));
    }

    settings
        .naming()
        .map_err(|err| ConfigLoadError::Invalid(err.to_string()))?;
    let destination = settings
        .parsed_destination()
        .map_err(|err| ConfigLoadError::Invalid(err.to_string()))?;

    if destination.is_none() && settings.environment == Environment::Production {
        warn!(
            target: "blocklog::config",
            "no destination configured in production; block shipping disabled"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn load(pairs: &[(&str, &str)]) -> Result<ConfigLoad, ConfigLoadError> {
        ConfigLoader::with_env(EnvSource::from_pairs(pairs.iter().copied())).load()
    }

    #[test]
    fn inline_json_then_overrides() {
        let loaded = load(&[
            (
                "BLOCKLOG_CONFIG_JSON",
                r#"{"destination": "s3://from-json", "poll_interval_ms": 5000}"#,
            ),
            ("TX_LOG_S3_BUCKET", "from-env"),
            ("UPLOAD_TASK_INTERVAL", "250ms"),
            ("BLOCKLOG_ENV", "test"),
        ])
        .unwrap();

        assert_eq!(loaded.source, ShipperSettingsSource::EnvInline);
        assert_eq!(loaded.settings.destination, "from-env");
        assert_eq!(
            loaded.settings.poll_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(loaded.settings.environment, Environment::Test);
    }

    #[test]
    fn empty_bucket_variable_disables_archiving() {
        let loaded = load(&[
            ("BLOCKLOG_CONFIG_JSON", r#"{"destination": "s3://from-json"}"#),
            ("TX_LOG_S3_BUCKET", ""),
        ])
        .unwrap();
        assert!(loaded.settings.parsed_destination().unwrap().is_none());
    }

    #[test]
    fn bad_environment_is_reported_by_name() {
        let err = load(&[("BLOCKLOG_ENV", "staging")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidEnv {
                name: "BLOCKLOG_ENV",
                ..
            }
        ));
    }

    #[test]
    fn bad_interval_is_reported_by_name() {
        let err = load(&[("UPLOAD_TASK_INTERVAL", "whenever")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidEnv {
                name: "UPLOAD_TASK_INTERVAL",
                ..
            }
        ));
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let zero_interval = ShipperSettings {
            poll_interval_ms: 0,
            ..ShipperSettings::default()
        };
        assert!(matches!(validate(&zero_interval), Err(ConfigLoadError::Invalid(_))));

        let narrow = ShipperSettings {
            block_name_width: 4,
            ..ShipperSettings::default()
        };
        assert!(matches!(validate(&narrow), Err(ConfigLoadError::Invalid(_))));

        let bad_scheme = ShipperSettings {
            destination: "ftp://archive".into(),
            ..ShipperSettings::default()
        };
        assert!(matches!(validate(&bad_scheme), Err(ConfigLoadError::Invalid(_))));
    }

    #[test]
    fn marker_and_recursion_overrides() {
        let loaded = load(&[
            ("BLOCKLOG_TEMP_MARKERS", "tmp-tx-log.bin, .partial"),
            ("BLOCKLOG_RECURSIVE", "yes"),
        ])
        .unwrap();
        assert_eq!(
            loaded.settings.temp_markers,
            vec!["tmp-tx-log.bin".to_string(), ".partial".to_string()]
        );
        assert!(loaded.settings.recursive);
    }
}
