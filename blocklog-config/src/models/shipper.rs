use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use blocklog_core::{
    BlockNaming, DEFAULT_BLOCK_NAME_WIDTH, DEFAULT_POLL_INTERVAL, DEFAULT_STALL_WARN_TICKS,
    DEFAULT_TEMP_MARKER, Destination, FileObserver, S3Options, ShipperConfig,
};
use serde::{Deserialize, Serialize};

use crate::util::EnvSource;

const CONFIG_PATH_VAR: &str = "BLOCKLOG_CONFIG_PATH";
const CONFIG_JSON_VAR: &str = "BLOCKLOG_CONFIG_JSON";

/// Settings files tried, in order, when neither variable is set.
pub const DEFAULT_SETTINGS_FILES: &[&str] = &[
    "blocklog.toml",
    "blocklog.json",
    "config/blocklog.toml",
    "config/blocklog.json",
];

fn default_temp_markers() -> Vec<String> {
    vec![DEFAULT_TEMP_MARKER.to_string()]
}

/// Source that produced the shipper settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShipperSettingsSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl fmt::Display for ShipperSettingsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipperSettingsSource::Default => f.write_str("defaults"),
            ShipperSettingsSource::EnvPath(path) => {
                write!(f, "$BLOCKLOG_CONFIG_PATH ({})", path.display())
            }
            ShipperSettingsSource::EnvInline => f.write_str("$BLOCKLOG_CONFIG_JSON"),
            ShipperSettingsSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Deployment environment, validated against a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
    Test,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "development" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(format!(
                "unknown environment {other:?}; expected production, development or test"
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Test => "test",
        })
    }
}

/// Connection overrides for S3-compatible services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct S3Settings {
    /// Region override; the AWS provider chain decides when unset.
    pub region: Option<String>,
    /// Custom endpoint for MinIO, localstack and friends.
    pub endpoint_url: Option<String>,
    /// Path-style addressing, needed by most self-hosted S3 services.
    pub force_path_style: bool,
}

impl S3Settings {
    pub fn to_options(&self) -> S3Options {
        S3Options {
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
            force_path_style: self.force_path_style,
        }
    }
}

/// Top-level shipper settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShipperSettings {
    /// Where blocks go. Empty disables archiving entirely; otherwise
    /// `s3://bucket`, a bare bucket name, or `file:///path`.
    pub destination: String,
    /// Directory the producer writes block files into.
    pub tx_log_directory: PathBuf,
    /// Uploader tick interval in milliseconds. Lower values ship blocks
    /// sooner at the cost of more listing-free wakeups.
    pub poll_interval_ms: u64,
    /// Consecutive stalled ticks between "missing block" warnings.
    pub stall_warn_ticks: u64,
    /// Digits in a block file name.
    pub block_name_width: usize,
    /// Substrings marking producer temp files.
    #[serde(default = "default_temp_markers")]
    pub temp_markers: Vec<String>,
    /// Watch and scan subdirectories too.
    pub recursive: bool,
    pub s3: S3Settings,
    pub environment: Environment,
}

impl Default for ShipperSettings {
    fn default() -> Self {
        Self {
            destination: String::new(),
            tx_log_directory: PathBuf::from("tx-log"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            stall_warn_ticks: DEFAULT_STALL_WARN_TICKS,
            block_name_width: DEFAULT_BLOCK_NAME_WIDTH,
            temp_markers: default_temp_markers(),
            recursive: false,
            s3: S3Settings::default(),
            environment: Environment::default(),
        }
    }
}

impl ShipperSettings {
    /// Resolve settings from the environment: the file named by
    /// `$BLOCKLOG_CONFIG_PATH`, else inline JSON in `$BLOCKLOG_CONFIG_JSON`,
    /// else the first [`DEFAULT_SETTINGS_FILES`] entry present under the
    /// working directory, else defaults.
    pub fn load_from_env(env: &EnvSource) -> anyhow::Result<(Self, ShipperSettingsSource)> {
        if let Some(path) = env.var(CONFIG_PATH_VAR).map(PathBuf::from) {
            let settings = Self::load_from_file(&path)?;
            return Ok((settings, ShipperSettingsSource::EnvPath(path)));
        }

        if let Some(raw) = env.var(CONFIG_JSON_VAR) {
            let settings = Self::parse_json(&raw)
                .with_context(|| format!("${CONFIG_JSON_VAR} does not hold shipper settings"))?;
            return Ok((settings, ShipperSettingsSource::EnvInline));
        }

        match Self::find_default_file(Path::new(".")) {
            Some(path) => {
                let settings = Self::load_from_file(&path)?;
                Ok((settings, ShipperSettingsSource::File(path)))
            }
            None => Ok((Self::default(), ShipperSettingsSource::Default)),
        }
    }

    /// `.json` and `.toml` files are read in that format; any other name
    /// may hold either.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read shipper settings file {}", path.display()))?;

        let parsed = match path.extension().and_then(OsStr::to_str) {
            Some("json") => Self::parse_json(&contents),
            Some("toml") => toml::from_str(&contents).map_err(anyhow::Error::from),
            _ => Self::parse_from_str(&contents),
        };
        parsed.with_context(|| format!("malformed shipper settings in {}", path.display()))
    }

    /// Settings in either TOML or JSON.
    pub fn parse_from_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents)
                .map_err(|json_err| anyhow!("neither TOML ({toml_err}) nor JSON ({json_err})"))
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub(crate) fn find_default_file(base: &Path) -> Option<PathBuf> {
        DEFAULT_SETTINGS_FILES
            .iter()
            .map(|name| base.join(name))
            .find(|path| path.is_file())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn naming(&self) -> blocklog_core::Result<BlockNaming> {
        BlockNaming::new(self.block_name_width, self.temp_markers.clone())
    }

    pub fn parsed_destination(&self) -> blocklog_core::Result<Option<Destination>> {
        Destination::parse(&self.destination)
    }

    /// Build the runtime configuration for a shipper.
    pub fn to_shipper_config(
        &self,
        observers: Vec<Arc<dyn FileObserver>>,
    ) -> blocklog_core::Result<ShipperConfig> {
        let config = ShipperConfig::new(self.parsed_destination()?, &self.tx_log_directory)
            .with_poll_interval(self.poll_interval())
            .with_stall_warn_ticks(self.stall_warn_ticks)
            .with_naming(self.naming()?)
            .with_recursive(self.recursive);

        Ok(observers
            .into_iter()
            .fold(config, |config, observer| config.with_observer(observer)))
    }
}
