//! YAML device configuration
//!
//! Loads the device document with support for these custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from the secrets.yaml next to the tagged file
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use esph_config::DeviceConfig;
//!
//! let config = DeviceConfig::load("livingroom.yaml")?;
//! println!("{} logs at {}", config.name, config.log_level);
//! ```

mod device_config;
mod duration;
mod error;
mod loader;
mod secrets;

pub use device_config::{
    BackendKind, DeviceConfig, LogLevel, PreferencesConfig, DEFAULT_FLASH_WRITE_INTERVAL_MS,
    DEFAULT_LOOP_INTERVAL_MS,
};
pub use duration::parse_duration_ms;
pub use error::{ConfigError, ConfigResult};
pub use loader::YamlLoader;
pub use secrets::Secrets;

pub use serde_yaml::Value;
