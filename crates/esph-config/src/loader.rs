//! YAML loader with custom tag support
//!
//! - `!include path` - include another YAML file relative to the including one
//! - `!secret key` - substitute from the secrets.yaml beside the tagged file
//! - `!env_var VAR [default]` - environment variable substitution

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a loader resolving relative paths against `config_dir`
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets: Secrets::new(),
            include_stack: HashSet::new(),
        }
    }

    /// Secrets substituted so far
    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = resolve_path(path.as_ref(), &self.config_dir);
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let processed = self.process_value(v, source_path)?;
                    result.insert(k, processed);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => {
                let result: ConfigResult<Vec<Value>> = seq
                    .into_iter()
                    .map(|v| self.process_value(v, source_path))
                    .collect();
                Ok(Value::Sequence(result?))
            }
            _ => Ok(value),
        }
    }

    fn process_tagged(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Processing tag '{}' with value {:?}", tag, tagged.value);

        match tag.as_str() {
            "!include" => {
                let name = Self::scalar(&tagged.value, "!include")?;
                let path = resolve_path(Path::new(&name), &self.base_dir(source_path));
                if !path.exists() {
                    return Err(ConfigError::IncludeNotFound { path });
                }
                debug!("Including file: {:?}", path);
                self.load_file(&path)
            }
            "!secret" => {
                let key = Self::scalar(&tagged.value, "!secret")?;
                let dir = self.base_dir(source_path);
                self.secrets.lookup(&dir, &key)
            }
            "!env_var" => self.process_env_var(&tagged.value),
            _ => {
                warn!("Unknown YAML tag '{}', keeping value as-is", tag);
                let processed = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value: processed,
                })))
            }
        }
    }

    fn base_dir(&self, source_path: &Path) -> PathBuf {
        source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config_dir.clone())
    }

    fn process_env_var(&self, value: &Value) -> ConfigResult<Value> {
        let arg = Self::scalar(value, "!env_var")?;
        let mut parts = arg.splitn(2, char::is_whitespace);
        let var = parts.next().unwrap_or_default();
        let default = parts.next().map(str::trim);

        match (std::env::var(var), default) {
            (Ok(v), _) => Ok(Value::String(v)),
            (Err(_), Some(d)) => Ok(Value::String(d.to_string())),
            (Err(_), None) => Err(ConfigError::invalid(
                "!env_var",
                format!("environment variable '{}' is not set", var),
            )),
        }
    }

    fn scalar(value: &Value, tag: &str) -> ConfigResult<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(ConfigError::invalid(tag, "expected a scalar argument")),
        }
    }
}

fn resolve_path(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
