// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::ConfigError;
use log::debug;
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/daemonless/daemonless.yaml";

/// Idle period used when a manager does not set `idle`.
pub const DEFAULT_IDLE: Duration = Duration::from_secs(30 * 60);

fn default_idle() -> Duration {
    DEFAULT_IDLE
}

/// What a child's stdout or stderr is connected to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioPolicy {
    /// Share the daemonless stream.
    #[default]
    Inherit,
    /// Discard output.
    Null,
}

// A bare YAML `null` reads as the `null` policy.
fn deserialize_stdio<'de, D>(deserializer: D) -> Result<StdioPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StdioPolicy>::deserialize(deserializer)?.unwrap_or(StdioPolicy::Null))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Prefix joined in front of every manager's `url`.
    #[serde(default)]
    pub root_url: String,
    #[serde(default)]
    pub managers: Vec<ManagerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// argv: program followed by its arguments.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_idle", deserialize_with = "deserialize_duration")]
    pub idle: Duration,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    #[serde(default, deserialize_with = "deserialize_stdio")]
    pub stdout: StdioPolicy,
    #[serde(default, deserialize_with = "deserialize_stdio")]
    pub stderr: StdioPolicy,
    /// SIGKILL the group if it is still alive this long after SIGTERM.
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub stop_timeout: Option<Duration>,
}

impl ManagerConfig {
    /// A config with defaults for everything but the command.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            name: None,
            command,
            idle: DEFAULT_IDLE,
            url: String::new(),
            env: HashMap::new(),
            working_dir: None,
            stdout: StdioPolicy::Inherit,
            stderr: StdioPolicy::Inherit,
            stop_timeout: None,
        }
    }

    /// Explicit `name`, else the file name of the program.
    pub fn display_name(&self) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        self.command
            .first()
            .and_then(|program| Path::new(program).file_name())
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed")
            .to_string()
    }
}

impl Config {
    /// Full activation route of a manager: `root_url` + `url`, rooted at `/`.
    pub fn route(&self, manager: &ManagerConfig) -> String {
        let route = format!("{}{}", self.root_url, manager.url);
        if route.starts_with('/') {
            route
        } else {
            format!("/{route}")
        }
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.managers.is_empty() {
            return Err(ConfigError::NoManagers {
                path: path.to_path_buf(),
            });
        }
        let mut routes = HashSet::new();
        for (index, manager) in self.managers.iter().enumerate() {
            if manager.command.first().is_none_or(|p| p.is_empty()) {
                return Err(ConfigError::EmptyCommand { index });
            }
            let route = self.route(manager);
            if !routes.insert(route.clone()) {
                return Err(ConfigError::DuplicateRoute { route });
            }
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    std::env::var("DAEMONLESS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Read, parse and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate(path)?;
    debug!(
        "loaded {} manager(s) from {}",
        config.managers.len(),
        path.display()
    );
    Ok(config)
}
