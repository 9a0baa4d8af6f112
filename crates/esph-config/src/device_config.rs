//! Device configuration
//!
//! ```yaml
//! name: livingroom
//! logger:
//!   level: debug
//! preferences:
//!   backend: file
//!   path: ./livingroom.prefs
//!   flash_write_interval: 60s
//! loop_interval: 16ms
//! ```

use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::duration::parse_duration_ms;
use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

pub const DEFAULT_FLASH_WRITE_INTERVAL_MS: u32 = 60_000;
pub const DEFAULT_LOOP_INTERVAL_MS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" | "verbose" | "very_verbose" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown log level '{}', expected trace|debug|info|warn|error",
                other
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Which preferences backend the host runner builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Memory,
    File,
    Nvs,
    RtcFlash,
    FlashSector,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "nvs" => Ok(BackendKind::Nvs),
            "rtc_flash" => Ok(BackendKind::RtcFlash),
            "flash_sector" => Ok(BackendKind::FlashSector),
            other => Err(format!(
                "unknown backend '{}', expected memory|file|nvs|rtc_flash|flash_sector",
                other
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Nvs => "nvs",
            BackendKind::RtcFlash => "rtc_flash",
            BackendKind::FlashSector => "flash_sector",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferencesConfig {
    pub backend: BackendKind,
    /// Storage file for the `file` backend
    pub path: Option<PathBuf>,
    /// `None` syncs only on shutdown, `Some(0)` on every tick
    pub flash_write_interval: Option<u32>,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            path: None,
            flash_write_interval: Some(DEFAULT_FLASH_WRITE_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub log_level: LogLevel,
    pub preferences: PreferencesConfig,
    pub loop_interval: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: LogLevel::Info,
            preferences: PreferencesConfig::default(),
            loop_interval: DEFAULT_LOOP_INTERVAL_MS,
        }
    }
}

fn default_name() -> String {
    "esphome".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default)]
    logger: RawLogger,
    #[serde(default)]
    preferences: RawPreferences,
    loop_interval: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogger {
    level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPreferences {
    backend: Option<String>,
    path: Option<PathBuf>,
    flash_write_interval: Option<Value>,
}

impl DeviceConfig {
    /// Build from an already-processed YAML value
    pub fn from_yaml(value: Value) -> ConfigResult<Self> {
        let value = match value {
            Value::Null => Value::Mapping(Default::default()),
            other => other,
        };
        let raw: RawConfig = serde_yaml::from_value(value)
            .map_err(|e| ConfigError::invalid("config", e.to_string()))?;

        if raw.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }

        let log_level = match raw.logger.level {
            Some(level) => level
                .parse()
                .map_err(|reason| ConfigError::invalid("logger.level", reason))?,
            None => LogLevel::default(),
        };

        let backend = match raw.preferences.backend {
            Some(backend) => backend
                .parse()
                .map_err(|reason| ConfigError::invalid("preferences.backend", reason))?,
            None => BackendKind::default(),
        };

        if backend == BackendKind::File && raw.preferences.path.is_none() {
            return Err(ConfigError::invalid(
                "preferences.path",
                "required for the file backend",
            ));
        }

        let flash_write_interval = match raw.preferences.flash_write_interval {
            None => Some(DEFAULT_FLASH_WRITE_INTERVAL_MS),
            Some(Value::String(s)) if s.trim() == "never" => None,
            Some(v) => Some(duration_field("preferences.flash_write_interval", &v)?),
        };

        let loop_interval = match raw.loop_interval {
            None => DEFAULT_LOOP_INTERVAL_MS,
            Some(v) => duration_field("loop_interval", &v)?,
        };
        if loop_interval == 0 {
            return Err(ConfigError::invalid("loop_interval", "must be at least 1ms"));
        }

        Ok(Self {
            name: raw.name,
            log_level,
            preferences: PreferencesConfig {
                backend,
                path: raw.preferences.path,
                flash_write_interval,
            },
            loop_interval,
        })
    }

    /// Load `path`, resolving `!include`/`!secret` relative to its directory
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file = path.file_name().map(Path::new).unwrap_or(path);

        let mut loader = YamlLoader::new(dir);
        let value = loader.load_file(file)?;
        let mut config = Self::from_yaml(value)?;

        if let Some(p) = config.preferences.path.take() {
            config.preferences.path = Some(if p.is_relative() { dir.join(p) } else { p });
        }
        Ok(config)
    }
}

fn duration_field(key: &str, value: &Value) -> ConfigResult<u32> {
    let ms = match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ConfigError::invalid(key, format!("'{}' is not a duration", n)))?,
        Value::String(s) => {
            parse_duration_ms(s).map_err(|reason| ConfigError::invalid(key, reason))?
        }
        _ => return Err(ConfigError::invalid(key, "expected a duration")),
    };
    u32::try_from(ms).map_err(|_| ConfigError::invalid(key, "duration does not fit in 32 bits"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ConfigResult<DeviceConfig> {
        DeviceConfig::from_yaml(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let config = parse("").unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert_eq!(config.preferences.flash_write_interval, Some(60_000));
        assert_eq!(config.loop_interval, 16);
    }

    #[test]
    fn test_full_document() {
        let config = parse(
            r#"
name: livingroom
logger:
  level: debug
preferences:
  backend: file
  path: ./livingroom.prefs
  flash_write_interval: 5min
loop_interval: 20ms
"#,
        )
        .unwrap();

        assert_eq!(config.name, "livingroom");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.preferences.backend, BackendKind::File);
        assert_eq!(
            config.preferences.path.as_deref(),
            Some(Path::new("./livingroom.prefs"))
        );
        assert_eq!(config.preferences.flash_write_interval, Some(300_000));
        assert_eq!(config.loop_interval, 20);
    }

    #[test]
    fn test_write_interval_never_and_zero() {
        let never = parse("preferences:\n  flash_write_interval: never\n").unwrap();
        assert_eq!(never.preferences.flash_write_interval, None);

        let every_tick = parse("preferences:\n  flash_write_interval: 0s\n").unwrap();
        assert_eq!(every_tick.preferences.flash_write_interval, Some(0));

        let bare = parse("preferences:\n  flash_write_interval: 1500\n").unwrap();
        assert_eq!(bare.preferences.flash_write_interval, Some(1500));
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let cases = [
            ("logger:\n  level: chatty\n", "logger.level"),
            ("preferences:\n  backend: eeprom\n", "preferences.backend"),
            ("preferences:\n  backend: file\n", "preferences.path"),
            ("loop_interval: fast\n", "loop_interval"),
            ("loop_interval: 0ms\n", "loop_interval"),
            (
                "preferences:\n  flash_write_interval: 2 fortnights\n",
                "preferences.flash_write_interval",
            ),
            ("name: ''\n", "name"),
        ];

        for (yaml, expected) in cases {
            match parse(yaml) {
                Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, expected, "{}", yaml),
                other => panic!("expected InvalidValue for {:?}, got {:?}", yaml, other),
            }
        }
    }

    #[test]
    fn test_backend_names_round_trip_through_display() {
        for kind in [
            BackendKind::Memory,
            BackendKind::File,
            BackendKind::Nvs,
            BackendKind::RtcFlash,
            BackendKind::FlashSector,
        ] {
            assert_eq!(kind.to_string().parse::<BackendKind>(), Ok(kind));
        }
    }
}
