//! Configuration library for the blocklog shipper.
//!
//! Settings come from a TOML or JSON file (or inline JSON), with a handful
//! of environment variables layered on top. The result converts into the
//! core's runtime [`blocklog_core::ShipperConfig`].

pub mod loader;
pub mod models;
pub mod util;

pub use loader::{ConfigLoad, ConfigLoader, apply_env_overrides, error::ConfigLoadError, validate};
pub use models::{DEFAULT_SETTINGS_FILES, Environment, S3Settings, ShipperSettings, ShipperSettingsSource};
pub use util::EnvSource;
