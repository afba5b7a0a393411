//! Docker registry access: the local Docker credentials file and the
//! registry's token and catalog endpoints.
//!
//! ## Credentials
//!
//! `login` stores `uid:token` under the registry host in the Docker config
//! (`auths.<host>.auth`, base64), so `docker push` works without a separate
//! `docker login`. The same entry is read back for `registry --list`.
//!
//! ## Endpoints
//!
//! - `POST {auth}/auth` (form): exchanges the credentials for a bearer token
//!   scoped to `registry:<user>/*:*`.
//! - `GET {proxy}/catalog?username=<user>`: lists the user's repositories.
//!
//! Both reply with JSON that may carry an `error` field.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::EndpointsConfig;
use crate::error::CliError;
use crate::util::write_atomic;

/// The subset of `~/.docker/config.json` this tool touches; everything else
/// is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: BTreeMap<String, DockerAuth>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerAuth {
    #[serde(default)]
    pub auth: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl DockerConfig {
    /// `None` when the file does not exist.
    pub async fn read(path: &Path) -> Result<Option<Self>, CliError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            CliError::Config(format!("invalid docker config {}: {e}", path.display()))
        })
    }

    pub async fn write(&self, path: &Path) -> Result<(), CliError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        write_atomic(path, &bytes, Some(0o600)).await?;
        debug!(path = %path.display(), "Docker config saved");
        Ok(())
    }

    pub fn set_credentials(&mut self, registry: &str, username: &str, password: &str) {
        let entry = self.auths.entry(registry.to_string()).or_default();
        entry.auth = BASE64.encode(format!("{username}:{password}"));
    }

    /// `(username, password)` stored for `registry`.
    pub fn credentials(&self, registry: &str) -> Option<(String, String)> {
        let raw = BASE64.decode(&self.auths.get(registry)?.auth).ok()?;
        let text = String::from_utf8(raw).ok()?;
        let (user, password) = text.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthResponse {
    error: Option<String>,
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogResponse {
    error: Option<String>,
    repositories: Vec<String>,
}

/// HTTP client for the registry auth and proxy services.
pub struct RegistryClient {
    http: reqwest::Client,
    auth_origin: String,
    proxy_origin: String,
}

impl RegistryClient {
    pub fn new(endpoints: &EndpointsConfig) -> Result<Self, CliError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("conhos/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            auth_origin: endpoints.registry_auth.trim_end_matches('/').to_string(),
            proxy_origin: endpoints.registry_proxy.trim_end_matches('/').to_string(),
        })
    }

    /// Exchange stored credentials for a registry bearer token.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<String, CliError> {
        let scope = format!("registry:{username}/*:*");
        let form = [
            ("service", "docker-registry"),
            ("username", username),
            ("password", password),
            ("scope", scope.as_str()),
        ];
        let resp = self
            .http
            .post(format!("{}/auth", self.auth_origin))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;
        let body: AuthResponse = handle_response(resp).await?;
        if let Some(error) = body.error {
            return Err(CliError::Auth(format!("registry rejected credentials: {error}")));
        }
        body.token
            .or(body.access_token)
            .ok_or_else(|| CliError::Protocol("registry auth reply has no token".to_string()))
    }

    /// Repositories owned by `username`.
    pub async fn catalog(&self, username: &str, token: &str) -> Result<Vec<String>, CliError> {
        let resp = self
            .http
            .get(format!("{}/catalog", self.proxy_origin))
            .query(&[("username", username)])
            .bearer_auth(token)
            .send()
            .await?;
        let body: CatalogResponse = handle_response(resp).await?;
        if let Some(error) = body.error {
            return Err(CliError::Protocol(format!("failed to get repositories: {error}")));
        }
        Ok(body.repositories)
    }
}

/// JSON body on success; the body's `error` field (or the raw body) otherwise.
async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, CliError> {
    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
        return serde_json::from_str(&body)
            .map_err(|e| CliError::Protocol(format!("invalid JSON from registry: {e}")));
    }
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or(body);
    Err(CliError::Protocol(format!(
        "registry returned HTTP {}: {message}",
        status.as_u16()
    )))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn credentials_round_trip_and_keep_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"auths":{"other.io":{"auth":"eDp5"}},"credsStore":"desktop"}"#,
        )
        .unwrap();

        let mut config = DockerConfig::read(&path).await.unwrap().unwrap();
        config.set_credentials("registry.local:5000", "u1", "tok:with:colons");
        config.write(&path).await.unwrap();

        let reread = DockerConfig::read(&path).await.unwrap().unwrap();
        assert_eq!(
            reread.credentials("registry.local:5000"),
            Some(("u1".to_string(), "tok:with:colons".to_string()))
        );
        assert_eq!(reread.credentials("other.io"), Some(("x".into(), "y".into())));
        assert_eq!(reread.other["credsStore"], "desktop");
        assert_eq!(reread.credentials("missing"), None);
    }

    #[tokio::test]
    async fn missing_docker_config_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DockerConfig::read(&dir.path().join("nope.json"))
            .await
            .unwrap()
            .is_none());
    }

    /// Serve one canned JSON reply per connection; returns each request head.
    async fn fake_http(replies: Vec<(u16, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in replies {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = sock.read(&mut chunk).await.unwrap();
                    assert!(n > 0);
                    buf.extend_from_slice(&chunk[..n]);
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                let head_end = text.find("\r\n\r\n").unwrap() + 4;
                let length: usize = text
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse().unwrap())
                    })
                    .unwrap_or(0);
                while buf.len() < head_end + length {
                    let n = sock.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                }
                requests.push(String::from_utf8_lossy(&buf).into_owned());
                let reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                sock.write_all(reply.as_bytes()).await.unwrap();
                sock.shutdown().await.unwrap();
            }
            requests
        });
        (origin, handle)
    }

    fn client(origin: &str) -> RegistryClient {
        let endpoints = EndpointsConfig {
            registry_auth: origin.to_string(),
            registry_proxy: format!("{origin}/"),
            ..EndpointsConfig::default()
        };
        RegistryClient::new(&endpoints).unwrap()
    }

    #[tokio::test]
    async fn authenticate_then_list_catalog() {
        let (origin, server) = fake_http(vec![
            (200, r#"{"token":"bearer-1"}"#),
            (200, r#"{"repositories":["u1/api","u1/web"]}"#),
        ])
        .await;
        let registry = client(&origin);

        let token = registry.authenticate("u1", "secret").await.unwrap();
        assert_eq!(token, "bearer-1");
        let repos = registry.catalog("u1", &token).await.unwrap();
        assert_eq!(repos, vec!["u1/api", "u1/web"]);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /auth "));
        assert!(requests[0].contains("service=docker-registry"));
        assert!(requests[0].contains("scope=registry%3Au1%2F*%3A*"));
        assert!(requests[1].starts_with("GET /catalog?username=u1 "));
        assert!(requests[1].to_ascii_lowercase().contains("authorization: bearer bearer-1"));
    }

    #[tokio::test]
    async fn registry_errors_are_reported() {
        let (origin, server) = fake_http(vec![
            (200, r#"{"error":"bad password"}"#),
            (500, r#"{"error":"catalog down"}"#),
        ])
        .await;
        let registry = client(&origin);

        let err = registry.authenticate("u1", "wrong").await.unwrap_err();
        assert!(matches!(err, CliError::Auth(ref m) if m.contains("bad password")));
        let err = registry.catalog("u1", "t").await.unwrap_err();
        assert!(err.to_string().contains("catalog down"));
        assert_eq!(err.exit_code(), 1);
        server.await.unwrap();
    }
}
