//! Wire types for the client protocol.
//!
//! Every frame is a JSON envelope:
//!
//! ```json
//! {"status": "info", "type": "checkTokenServer", "data": {...},
//!  "message": "", "packageName": "conhos", "userId": "u1",
//!  "token": "…", "connId": "…", "lang": "en"}
//! ```
//!
//! Outgoing frames are built from [`Outbound`], an adjacently tagged enum
//! (`type` + `data`). Incoming frames are decoded in two steps: the envelope
//! first, with `data` left as raw JSON, then `data` is parsed according to
//! `type` into [`Inbound`]. Unknown types become [`Inbound::Unknown`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::project::ConfigFile;
use crate::PACKAGE_NAME;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Info,
    Warn,
    Error,
}

/// Identity fields stamped on every outgoing envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub user_id: String,
    pub conn_id: String,
}

// ─── Outgoing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status: Status,
    #[serde(flatten)]
    pub body: Outbound,
    pub message: String,
    pub package_name: &'static str,
    pub user_id: String,
    pub token: Option<String>,
    pub conn_id: String,
    pub lang: &'static str,
}

impl Envelope {
    pub fn new(status: Status, body: Outbound, creds: &Credentials) -> Self {
        Self {
            status,
            body,
            message: String::new(),
            package_name: PACKAGE_NAME,
            user_id: creds.user_id.clone(),
            token: creds.token.clone(),
            conn_id: creds.conn_id.clone(),
            lang: "en",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Outbound {
    #[serde(rename = "setSocketServer")]
    SetSocket(SetSocketData),
    #[serde(rename = "checkTokenServer")]
    CheckToken(CheckTokenData),
    /// Carries the connection id the browser flow will authorize.
    #[serde(rename = "loginServer")]
    Login(String),
    #[serde(rename = "deploy")]
    Deploy(DeployChunk),
    #[serde(rename = "acceptDeleteServer")]
    AcceptDelete(AcceptDeleteData),
    #[serde(rename = "execServer")]
    Exec(ExecRequest),
    #[serde(rename = "getLogsServer")]
    GetLogs(LogsRequest),
    #[serde(rename = "ipServer")]
    Ip(ProjectRef),
    #[serde(rename = "getDeployData")]
    GetDeployData(()),
    #[serde(rename = "projectDeleteServer")]
    ProjectDelete(ProjectDeleteData),
    #[serde(rename = "projectDeleteAcceptServer")]
    ProjectDeleteAccept(ProjectDeleteAcceptData),
    #[serde(rename = "serviceRestartServer")]
    ServiceRestart(ServiceRestartData),
    #[serde(rename = "remove")]
    Remove(ProjectRef),
}

impl Outbound {
    /// Wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetSocket(_) => "setSocketServer",
            Self::CheckToken(_) => "checkTokenServer",
            Self::Login(_) => "loginServer",
            Self::Deploy(_) => "deploy",
            Self::AcceptDelete(_) => "acceptDeleteServer",
            Self::Exec(_) => "execServer",
            Self::GetLogs(_) => "getLogsServer",
            Self::Ip(_) => "ipServer",
            Self::GetDeployData(()) => "getDeployData",
            Self::ProjectDelete(_) => "projectDeleteServer",
            Self::ProjectDeleteAccept(_) => "projectDeleteAcceptServer",
            Self::ServiceRestart(_) => "serviceRestartServer",
            Self::Remove(_) => "remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetSocketData {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckTokenData {
    pub skip_set_project: bool,
}

/// One fragment of the deploy archive; `chunk` is base64.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployChunk {
    pub num: u64,
    pub project: String,
    pub last: bool,
    pub chunk: String,
    pub config: Option<ConfigFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptDeleteData {
    pub service_name: String,
    pub accept: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecRequest {
    pub service: String,
    pub project: String,
    pub repl: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsRequest {
    pub watch: bool,
    pub timestamps: bool,
    pub service_name: String,
    pub project: String,
    pub since: Option<String>,
    pub until: Option<String>,
    pub tail: Option<u32>,
    pub clear: bool,
    pub config: Option<ConfigFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRef {
    pub project: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDeleteData {
    pub name: String,
    #[serde(rename = "interractive")]
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDeleteAcceptData {
    pub name: String,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRestartData {
    pub project: String,
    pub service: String,
}

// ─── Incoming ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(default)]
    status: Status,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    message: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    conn_id: Option<String>,
    #[serde(default)]
    data: Value,
}

/// A decoded incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub status: Status,
    /// The `type` tag exactly as received.
    pub kind: String,
    pub message: String,
    pub user_id: Option<String>,
    pub token: Option<String>,
    /// Assigned by the server on `setSocket`.
    pub conn_id: Option<String>,
    pub body: Inbound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Server asks for the stored token.
    SetSocket,
    CheckToken(TokenCheck),
    /// Browser authorization finished; the token is on the envelope.
    Login,
    Message(StatusLine),
    DeployProgress(ProgressLine),
    AcceptDelete(AcceptDeletePrompt),
    Exec(ExecHandoff),
    Logs(LogChunk),
    LogsHandoff(LogsHandoff),
    Ip(IpReply),
    DeployData(DeployData),
    ProjectDeleteProgress(ProgressLine),
    ProjectDeleteAccept(ProjectDeletePrompt),
    ServiceRestartProgress(ProgressLine),
    Unknown(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenCheck {
    pub checked: bool,
    pub error: Option<String>,
    pub skip_set_project: bool,
}

/// `checkToken` data is either a bare boolean or a detail object.
#[derive(Deserialize)]
#[serde(untagged)]
enum TokenCheckWire {
    Flag(bool),
    #[serde(rename_all = "camelCase")]
    Detail {
        #[serde(default)]
        checked: bool,
        #[serde(default)]
        err_mess: Option<String>,
        #[serde(default)]
        skip_set_project: bool,
    },
}

impl From<Option<TokenCheckWire>> for TokenCheck {
    fn from(wire: Option<TokenCheckWire>) -> Self {
        match wire {
            None => Self::default(),
            Some(TokenCheckWire::Flag(checked)) => Self {
                checked,
                ..Self::default()
            },
            Some(TokenCheckWire::Detail {
                checked,
                err_mess,
                skip_set_project,
            }) => Self {
                checked,
                error: err_mess,
                skip_set_project,
            },
        }
    }
}

/// Generic status line; `end` marks a clean finish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusLine {
    #[serde(deserialize_with = "lenient_string")]
    pub msg: String,
    pub end: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProgressLine {
    #[serde(deserialize_with = "lenient_string")]
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptDeletePrompt {
    pub service_name: String,
    #[serde(default)]
    pub service_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecHandoff {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogChunk {
    pub text: String,
    pub last: bool,
    pub num: Option<u64>,
}

/// Where to read the logs from instead of the socket. The whole payload is
/// posted back to `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsHandoff {
    pub url: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IpReply {
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectDeletePrompt {
    pub name: String,
}

/// Catalog returned for `init`: service kinds, sizes and pricing basis.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeployData {
    pub services: Vec<ServiceTemplate>,
    pub sizes: Vec<SizeOption>,
    pub base_value: f64,
    pub base_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceTemplate {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub images: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SizeOption {
    pub name: String,
    pub memory: Memory,
    pub cpus: f64,
    pub storage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Memory {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("bad `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, DecodeError> {
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

/// Decode one text frame. Types are accepted with or without the `Cli` suffix.
pub fn decode(text: &str) -> Result<Incoming, DecodeError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    let kind = raw.kind.strip_suffix("Cli").unwrap_or(&raw.kind);
    let data = raw.data;

    let body = match kind {
        "setSocket" => Inbound::SetSocket,
        "checkToken" => {
            let wire: Option<TokenCheckWire> = serde_json::from_value(data).map_err(|source| {
                DecodeError::Payload {
                    kind: kind.to_string(),
                    source,
                }
            })?;
            Inbound::CheckToken(wire.into())
        }
        "login" => Inbound::Login,
        "message" => Inbound::Message(payload(kind, data)?),
        "deployProgress" => Inbound::DeployProgress(payload(kind, data)?),
        "acceptDelete" => Inbound::AcceptDelete(payload(kind, data)?),
        "exec" => Inbound::Exec(payload(kind, data)?),
        "logs" => Inbound::Logs(payload(kind, data)?),
        "getLogs" => Inbound::LogsHandoff(payload(kind, data)?),
        "ip" => Inbound::Ip(payload(kind, data)?),
        "deployData" => Inbound::DeployData(payload(kind, data)?),
        "projectDeleteProgress" => Inbound::ProjectDeleteProgress(payload(kind, data)?),
        "projectDeleteAccept" => Inbound::ProjectDeleteAccept(payload(kind, data)?),
        "serviceRestartProgress" => Inbound::ServiceRestartProgress(payload(kind, data)?),
        other => Inbound::Unknown(other.to_string()),
    };

    Ok(Incoming {
        status: raw.status,
        kind: raw.kind.clone(),
        message: raw.message,
        user_id: raw.user_id,
        token: raw.token,
        conn_id: raw.conn_id.filter(|c| !c.is_empty()),
        body,
    })
}
