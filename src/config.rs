//! Client settings: endpoints, local paths and logging.
//!
//! Settings are resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `WEBSOCKET_ADDRESS`, `LOGIN_PAGE`,
//!    `REGISTRY_ORIGIN`, `REGISTRY_AUTH_ORIGIN`, `REGISTRY_PROXY_ORIGIN`,
//!    `CONHOS_HOME`, `DOCKER_CONFIG`
//! 2. **Settings file**: path via `--settings <path>`, or
//!    `~/.conhos/settings.toml` when it exists
//! 3. **Compiled defaults**: see each field's default value below
//!
//! ```toml
//! [endpoints]
//! websocket = "https://ws.conhos.example"
//! login_page = "https://conhos.example/account/sign-in"
//! registry = "registry.conhos.example"
//! registry_auth = "https://registry-auth.conhos.example"
//! registry_proxy = "https://registry-proxy.conhos.example"
//!
//! [paths]
//! data_dir = "~/.conhos"
//! docker_config = "~/.docker/config.json"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::CliError;
use crate::util::{build_ws_url, expand_tilde};

/// Name of the session file inside the data directory.
pub const SESSION_FILE_NAME: &str = "auth";
/// Query-string key that carries the connection id to the sign-in page.
pub const QUERY_STRING_CONN_ID: &str = "conn";

const DEFAULT_SETTINGS_PATH: &str = "~/.conhos/settings.toml";

/// Top-level settings, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote service addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    /// Protocol endpoint; `http(s)` is rewritten to `ws(s)` on connect.
    #[serde(default = "default_websocket")]
    pub websocket: String,
    /// Browser sign-in page; `?conn=<connId>` is appended.
    #[serde(default = "default_login_page")]
    pub login_page: String,
    /// Registry host used as the key in the Docker config `auths` map.
    #[serde(default = "default_registry")]
    pub registry: String,
    #[serde(default = "default_registry_auth")]
    pub registry_auth: String,
    #[serde(default = "default_registry_proxy")]
    pub registry_proxy: String,
}

/// Local filesystem locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the session file (default `~/.conhos`).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Docker client config receiving registry credentials on login.
    #[serde(default = "default_docker_config")]
    pub docker_config: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_websocket() -> String {
    "http://localhost:3002".to_string()
}
fn default_login_page() -> String {
    "http://localhost:3000/account/sign-in".to_string()
}
fn default_registry() -> String {
    "localhost:5000".to_string()
}
fn default_registry_auth() -> String {
    "http://localhost:5001".to_string()
}
fn default_registry_proxy() -> String {
    "http://localhost:5002".to_string()
}
fn default_data_dir() -> String {
    "~/.conhos".to_string()
}
fn default_docker_config() -> String {
    "~/.docker/config.json".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            websocket: default_websocket(),
            login_page: default_login_page(),
            registry: default_registry(),
            registry_auth: default_registry_auth(),
            registry_proxy: default_registry_proxy(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            docker_config: default_docker_config(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with the precedence chain: env vars > file > defaults.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&str>) -> Result<Self, CliError> {
        let mut settings = if let Some(p) = path {
            Self::from_file(Path::new(expand_tilde(p).as_ref()))?
        } else {
            let default_path = PathBuf::from(expand_tilde(DEFAULT_SETTINGS_PATH).as_ref());
            if default_path.exists() {
                Self::from_file(&default_path)?
            } else {
                Self::default()
            }
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("failed to read settings {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("failed to parse settings {}: {e}", path.display()))
        })
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WEBSOCKET_ADDRESS") {
            self.endpoints.websocket = v;
        }
        if let Some(v) = lookup("LOGIN_PAGE") {
            self.endpoints.login_page = v;
        }
        if let Some(v) = lookup("REGISTRY_ORIGIN") {
            self.endpoints.registry = v;
        }
        if let Some(v) = lookup("REGISTRY_AUTH_ORIGIN") {
            self.endpoints.registry_auth = v;
        }
        if let Some(v) = lookup("REGISTRY_PROXY_ORIGIN") {
            self.endpoints.registry_proxy = v;
        }
        if let Some(v) = lookup("CONHOS_HOME") {
            self.paths.data_dir = v;
        }
        if let Some(dir) = lookup("DOCKER_CONFIG") {
            self.paths.docker_config = format!("{}/config.json", dir.trim_end_matches('/'));
        }
    }

    /// `ws(s)://` URL of the protocol endpoint.
    pub fn ws_url(&self) -> Result<String, CliError> {
        build_ws_url(&self.endpoints.websocket)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.paths.data_dir).as_ref())
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir().join(SESSION_FILE_NAME)
    }

    pub fn docker_config_path(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.paths.docker_config).as_ref())
    }

    /// Sign-in URL carrying the one-time connection id.
    pub fn login_url(&self, conn_id: &str) -> String {
        format!(
            "{}?{QUERY_STRING_CONN_ID}={conn_id}",
            self.endpoints.login_page
        )
    }
}
