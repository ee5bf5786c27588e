//! Layered plugin configuration.
//!
//! Entries are collected from four sources and merged shallowly in ascending
//! priority: plugin defaults, config files, environment variables, and inline
//! configuration supplied by the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::schema::ConfigSchema;
use crate::errors::{ChartguardError, Result};
use crate::logging::{default_sink, SharedSink};
use crate::parser::parse_document;
use crate::plugin::Plugin;

/// Prefix of every plugin environment variable.
pub const ENV_PREFIX: &str = "CHARTGUARD_PLUGIN_";

/// Priority of each configuration source. Higher wins.
pub const PRIORITY_DEFAULT: i32 = 0;
pub const PRIORITY_FILE: i32 = 10;
pub const PRIORITY_ENVIRONMENT_FILE: i32 = 15;
pub const PRIORITY_ENVIRONMENT: i32 = 20;
pub const PRIORITY_INLINE: i32 = 30;

const CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

const COMPONENT: &str = "config";

/// Where a configuration entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
    Inline,
}

/// One layer of plugin configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationEntry {
    pub value: Map<String, Value>,
    pub source: ConfigSource,
    /// Environment the entry is scoped to, if any.
    pub environment: Option<String>,
    pub priority: i32,
    pub schema: Option<ConfigSchema>,
}

/// Outcome of resolving a plugin's configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedConfiguration {
    /// Merged configuration.
    pub config: Map<String, Value>,
    /// Every contributing entry, in merge order.
    pub entries: Vec<ConfigurationEntry>,
    /// Schema problems with the merged configuration. Not fatal.
    pub validation_errors: Vec<String>,
}

impl LoadedConfiguration {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

/// Resolves plugin configuration from all sources.
pub struct ConfigurationLoader {
    config_dir: Option<PathBuf>,
    validate_schema: bool,
    env: Option<HashMap<String, String>>,
    sink: SharedSink,
}

impl Default for ConfigurationLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: None,
            validate_schema: true,
            env: None,
            sink: default_sink(),
        }
    }

    /// Directory searched for `<plugin>.<ext>` and `<plugin>.<env>.<ext>` files.
    #[must_use]
    pub fn with_config_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config_dir = dir;
        self
    }

    #[must_use]
    pub fn with_schema_validation(mut self, enabled: bool) -> Self {
        self.validate_schema = enabled;
        self
    }

    /// Use a fixed set of environment variables instead of the process
    /// environment.
    #[must_use]
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Resolve the configuration of `plugin`.
    ///
    /// Schema problems are reported in
    /// [`LoadedConfiguration::validation_errors`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed,
    /// or does not contain a mapping.
    pub fn load_plugin_configuration(
        &self,
        plugin: &dyn Plugin,
        environment: Option<&str>,
        inline: Option<&Map<String, Value>>,
    ) -> Result<LoadedConfiguration> {
        let name = plugin.name();
        let schema = plugin.config_schema();
        let mut entries = Vec::new();

        let defaults = plugin.default_config();
        if !defaults.is_empty() {
            entries.push(ConfigurationEntry {
                value: defaults,
                source: ConfigSource::Default,
                environment: None,
                priority: PRIORITY_DEFAULT,
                schema: schema.clone(),
            });
        }

        entries.extend(self.file_entries(name, environment, schema.as_ref())?);

        let from_env = self.env_entry(name);
        if !from_env.is_empty() {
            entries.push(ConfigurationEntry {
                value: from_env,
                source: ConfigSource::Environment,
                environment: environment.map(str::to_string),
                priority: PRIORITY_ENVIRONMENT,
                schema: schema.clone(),
            });
        }

        if let Some(inline) = inline.filter(|m| !m.is_empty()) {
            entries.push(ConfigurationEntry {
                value: inline.clone(),
                source: ConfigSource::Inline,
                environment: environment.map(str::to_string),
                priority: PRIORITY_INLINE,
                schema: schema.clone(),
            });
        }

        let config = merge_entries(&mut entries);

        let validation_errors = match (&schema, self.validate_schema) {
            (Some(schema), true) => schema.validate(&Value::Object(config.clone())),
            _ => Vec::new(),
        };
        if !validation_errors.is_empty() {
            self.sink.warn(
                COMPONENT,
                &format!(
                    "configuration for plugin '{name}' does not match its schema: {}",
                    validation_errors.join("; ")
                ),
            );
        }
        self.sink.debug(
            COMPONENT,
            &format!(
                "resolved configuration for plugin '{name}' from {} source(s)",
                entries.len()
            ),
        );

        Ok(LoadedConfiguration {
            config,
            entries,
            validation_errors,
        })
    }

    fn file_entries(
        &self,
        plugin: &str,
        environment: Option<&str>,
        schema: Option<&ConfigSchema>,
    ) -> Result<Vec<ConfigurationEntry>> {
        let Some(dir) = &self.config_dir else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        if let Some(path) = find_config_file(dir, plugin) {
            entries.push(ConfigurationEntry {
                value: read_config_file(plugin, &path)?,
                source: ConfigSource::File,
                environment: None,
                priority: PRIORITY_FILE,
                schema: schema.cloned(),
            });
            self.sink
                .debug(COMPONENT, &format!("loaded config file {}", path.display()));
        }
        if let Some(env) = environment {
            if let Some(path) = find_config_file(dir, &format!("{plugin}.{env}")) {
                entries.push(ConfigurationEntry {
                    value: read_config_file(plugin, &path)?,
                    source: ConfigSource::File,
                    environment: Some(env.to_string()),
                    priority: PRIORITY_ENVIRONMENT_FILE,
                    schema: schema.cloned(),
                });
                self.sink
                    .debug(COMPONENT, &format!("loaded config file {}", path.display()));
            }
        }
        Ok(entries)
    }

    fn env_entry(&self, plugin: &str) -> Map<String, Value> {
        let prefix = env_prefix_for(plugin);
        let mut map = Map::new();
        let mut apply = |key: &str, value: &str| {
            if let Some(suffix) = key.strip_prefix(&prefix) {
                if !suffix.is_empty() {
                    map.insert(suffix.to_lowercase(), parse_env_value(value));
                }
            }
        };
        match &self.env {
            Some(vars) => {
                // Sorted so that colliding suffixes resolve deterministically.
                let mut keys: Vec<&String> = vars.keys().collect();
                keys.sort();
                for key in keys {
                    apply(key, &vars[key]);
                }
            }
            None => {
                let mut vars: Vec<(String, String)> = std::env::vars().collect();
                vars.sort();
                for (key, value) in &vars {
                    apply(key, value);
                }
            }
        }
        map
    }
}

/// Environment variable prefix for a plugin, e.g.
/// `CHARTGUARD_PLUGIN_REQUIRED_LABELS_` for `required-labels`.
#[must_use]
pub fn env_prefix_for(plugin: &str) -> String {
    let name: String = plugin
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}{name}_")
}

/// JSON if it parses, else the raw string.
fn parse_env_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Sort entries by priority (stable) and merge top-level keys, later wins.
fn merge_entries(entries: &mut [ConfigurationEntry]) -> Map<String, Value> {
    entries.sort_by_key(|entry| entry.priority);
    let mut merged = Map::new();
    for entry in entries.iter() {
        for (key, value) in &entry.value {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn find_config_file(dir: &Path, stem: &str) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|path| path.is_file())
}

fn read_config_file(plugin: &str, path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)?
    } else {
        parse_document(&content)?
    };
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ChartguardError::Configuration {
            plugin: plugin.to_string(),
            errors: vec![format!(
                "config file {} must contain a mapping, found {}",
                path.display(),
                match other {
                    Value::Array(_) => "a sequence",
                    _ => "a scalar",
                }
            )],
        }),
    }
}
