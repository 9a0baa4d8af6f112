//! `!secret` resolution
//!
//! A `!secret key` tag is looked up in the `secrets.yaml` that sits in the
//! same directory as the file containing the tag, so an included file from
//! another directory sees that directory's secrets. Each secrets file is
//! read once per loader. Values keep their YAML type.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SECRETS_FILE: &str = "secrets.yaml";

/// Secrets files seen while loading, keyed by directory
#[derive(Debug, Default)]
pub struct Secrets {
    files: HashMap<PathBuf, Mapping>,
    substituted: HashMap<String, String>,
}

impl Secrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key` from the secrets file in `dir`
    pub fn lookup(&mut self, dir: &Path, key: &str) -> ConfigResult<Value> {
        let path = dir.join(SECRETS_FILE);
        let value = self
            .file(dir)?
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
                path,
            })?;

        if let Some(text) = scalar_text(&value) {
            self.substituted.insert(text, key.to_string());
        }
        Ok(value)
    }

    /// Name of the secret a substituted scalar came from, for redacting
    /// dumps of the processed document
    pub fn secret_name(&self, value: &str) -> Option<&str> {
        self.substituted.get(value).map(String::as_str)
    }

    /// Number of distinct secrets files read so far
    pub fn files_loaded(&self) -> usize {
        self.files.len()
    }

    fn file(&mut self, dir: &Path) -> ConfigResult<&Mapping> {
        if !self.files.contains_key(dir) {
            let mapping = read_secrets(&dir.join(SECRETS_FILE))?;
            self.files.insert(dir.to_path_buf(), mapping);
        }
        self.files
            .get(dir)
            .ok_or_else(|| ConfigError::invalid("!secret", "secrets file was not cached"))
    }
}

fn read_secrets(path: &Path) -> ConfigResult<Mapping> {
    if !path.exists() {
        debug!("No secrets file at {:?}", path);
        return Ok(Mapping::new());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: Value = serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
        path: path.to_path_buf(),
        source,
    })?;

    match doc {
        Value::Mapping(mapping) => {
            debug!("Read {} secrets from {:?}", mapping.len(), path);
            Ok(mapping)
        }
        Value::Null => Ok(Mapping::new()),
        _ => Err(ConfigError::invalid(
            SECRETS_FILE,
            "top level must be a mapping of names to values",
        )),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_values_keep_their_type() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SECRETS_FILE),
            "wifi_password: hunter2\nport: 6053\nenabled: true\n",
        )
        .unwrap();

        let mut secrets = Secrets::new();
        assert_eq!(
            secrets.lookup(dir.path(), "wifi_password").unwrap(),
            Value::from("hunter2")
        );
        assert_eq!(secrets.lookup(dir.path(), "port").unwrap(), Value::from(6053));
        assert_eq!(secrets.lookup(dir.path(), "enabled").unwrap(), Value::from(true));
        assert_eq!(secrets.files_loaded(), 1);
        assert_eq!(secrets.secret_name("hunter2"), Some("wifi_password"));
        assert_eq!(secrets.secret_name("6053"), Some("port"));
    }

    #[test]
    fn test_secrets_are_per_directory() {
        let root = TempDir::new().unwrap();
        let nested = root.path().join("common");
        fs::create_dir(&nested).unwrap();
        fs::write(root.path().join(SECRETS_FILE), "ssid: top\n").unwrap();
        fs::write(nested.join(SECRETS_FILE), "ssid: nested\n").unwrap();

        let mut secrets = Secrets::new();
        assert_eq!(secrets.lookup(root.path(), "ssid").unwrap(), Value::from("top"));
        assert_eq!(secrets.lookup(&nested, "ssid").unwrap(), Value::from("nested"));
        assert_eq!(secrets.files_loaded(), 2);
    }

    #[test]
    fn test_missing_file_has_no_secrets() {
        let dir = TempDir::new().unwrap();
        let mut secrets = Secrets::new();
        let err = secrets.lookup(dir.path(), "nope").unwrap_err();
        assert!(matches!(err, ConfigError::SecretNotFound { key, .. } if key == "nope"));
    }

    #[test]
    fn test_non_mapping_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SECRETS_FILE), "- a\n- b\n").unwrap();
        let err = Secrets::new().lookup(dir.path(), "a").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
