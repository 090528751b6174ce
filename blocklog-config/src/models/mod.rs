pub mod shipper;

pub use shipper::{DEFAULT_SETTINGS_FILES, Environment, S3Settings, ShipperSettings, ShipperSettingsSource};
