//! Project config file (`conhos.yaml` / `conhos.yml`).
//!
//! The file is read from the working directory, `$VAR` and `${VAR}`
//! references are expanded from the environment, and the result is validated before any
//! command that depends on it talks to the server.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CliError;
use crate::util::substitute_vars;

/// Accepted config file names, in lookup order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["conhos.yaml", "conhos.yml"];
pub const PORT_MAX: u32 = 65_535;
pub const PORT_TYPES: [&str; 2] = ["http", "ws"];
pub const DOMAIN_MAX_LENGTH: usize = 77;

/// Parsed project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Project name; falls back to the directory name when omitted.
    #[serde(default, alias = "name")]
    pub project: String,
    #[serde(default)]
    pub services: IndexMap<String, Service>,
    /// Paths (relative to the project root) left out of the deploy archive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Keys without a typed field, carried to the server as written.
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub domains: IndexMap<String, String>,
    #[serde(default)]
    pub environment: Environment,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub port: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Environment either as `KEY=value` lines or as a mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    List(Vec<String>),
    Map(IndexMap<String, serde_yaml::Value>),
}

impl Default for Environment {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// Locate the config file in `dir`.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

impl ConfigFile {
    /// Parse YAML text after variable expansion through `lookup`.
    pub fn parse(text: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CliError> {
        let (expanded, missing) = substitute_vars(text, lookup);
        for name in &missing {
            warn!(variable = %name, "Undefined environment variable");
        }
        serde_yaml::from_str(&expanded)
            .map_err(|e| CliError::Config(format!("invalid config file: {e}")))
    }

    /// Load and validate the config in `dir`. A missing file is a config error.
    pub fn load(dir: &Path) -> Result<(PathBuf, Self), CliError> {
        let path = find_config_file(dir).ok_or_else(|| {
            CliError::Config(format!(
                "config file is not found in {}, run `conhos init` first",
                dir.display()
            ))
        })?;
        let text = std::fs::read_to_string(&path)?;
        let mut config = Self::parse(&text, |name| std::env::var(name).ok())?;
        if config.project.is_empty() {
            config.project = dir_name(dir);
        }
        config.validate()?;
        Ok((path, config))
    }

    /// Like [`ConfigFile::load`] but `None` when no file exists.
    pub fn load_optional(dir: &Path) -> Result<Option<Self>, CliError> {
        if find_config_file(dir).is_none() {
            return Ok(None);
        }
        Self::load(dir).map(|(_, config)| Some(config))
    }

    /// Check the rules the server would reject anyway.
    pub fn validate(&self) -> Result<(), CliError> {
        for (name, service) in &self.services {
            for port in &service.ports {
                if !PORT_TYPES.contains(&port.kind.as_str()) {
                    return Err(CliError::Config(format!(
                        "service \"{name}\": port type \"{}\" is not allowed, allowed port types: [{}]",
                        port.kind,
                        PORT_TYPES.join("|")
                    )));
                }
                if port.port == 0 || port.port > PORT_MAX {
                    return Err(CliError::Config(format!(
                        "service \"{name}\": port {} is out of range 1..={PORT_MAX}",
                        port.port
                    )));
                }
            }
            for domain in service.domains.values() {
                if domain.len() > DOMAIN_MAX_LENGTH {
                    return Err(CliError::Config(format!(
                        "service \"{name}\": maximum allowed domain length is {DOMAIN_MAX_LENGTH}, \"{domain}\" is {}",
                        domain.len()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, CliError> {
        serde_yaml::to_string(self).map_err(|e| CliError::Config(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<(), CliError> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

/// Final path component of `dir`, or `"no-project"`.
pub fn dir_name(dir: &Path) -> String {
    dir.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "no-project".to_string())
}

/// Project name chosen by an explicit flag, then the config, then a placeholder.
pub fn resolve_project_name(flag: Option<&str>, config: Option<&ConfigFile>) -> String {
    flag.map(str::to_string)
        .or_else(|| config.map(|c| c.project.clone()))
        .unwrap_or_else(|| "no-project".to_string())
}
