use esph_config::{BackendKind, ConfigError, DeviceConfig, LogLevel};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_with_secrets_and_relative_path() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("secrets.yaml"), "node: greenhouse\n").unwrap();
    fs::write(
        dir.path().join("device.yaml"),
        r#"
name: !secret node
logger:
  level: warn
preferences:
  backend: file
  path: state/greenhouse.prefs
  flash_write_interval: never
"#,
    )
    .unwrap();

    let config = DeviceConfig::load(dir.path().join("device.yaml")).unwrap();
    assert_eq!(config.name, "greenhouse");
    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.preferences.backend, BackendKind::File);
    assert_eq!(
        config.preferences.path,
        Some(dir.path().join("state/greenhouse.prefs"))
    );
    assert_eq!(config.preferences.flash_write_interval, None);
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = DeviceConfig::load(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}

#[test]
fn test_load_malformed_yaml() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("device.yaml"), "name: [unclosed\n").unwrap();

    let err = DeviceConfig::load(dir.path().join("device.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::ParseYaml { .. }));
}

#[test]
fn test_load_included_preferences() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("prefs.yaml"),
        "backend: rtc_flash\nflash_write_interval: 10s\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("device.yaml"),
        "name: porch\npreferences: !include prefs.yaml\n",
    )
    .unwrap();

    let config = DeviceConfig::load(dir.path().join("device.yaml")).unwrap();
    assert_eq!(config.preferences.backend, BackendKind::RtcFlash);
    assert_eq!(config.preferences.flash_write_interval, Some(10_000));
}
