//! `logs`: request service logs and print them.
//!
//! The server either streams numbered `logs` chunks over the socket, printed
//! in sequence order, or hands off with `getLogs {url, serviceName}`. On a
//! hand-off the payload is posted back to `url` and the response body is
//! copied to stdout as it arrives.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cli::LogsArgs;
use crate::error::{CliError, Outcome};
use crate::project::{resolve_project_name, ConfigFile};
use crate::protocol::message::{LogChunk, LogsHandoff, LogsRequest};
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Inbound, Incoming, Outbound, Status};

/// Header naming the socket the node should report to.
pub const HEADER_CONN_ID: &str = "conn-id";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Releases numbered chunks strictly in order; unnumbered chunks pass through.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next: u64,
    pending: BTreeMap<u64, LogChunk>,
}

impl ReorderBuffer {
    pub fn push(&mut self, chunk: LogChunk) -> Vec<LogChunk> {
        let Some(num) = chunk.num else {
            return vec![chunk];
        };
        if num < self.next {
            debug!(num, "Dropping already printed log chunk");
            return Vec::new();
        }
        self.pending.insert(num, chunk);
        let mut ready = Vec::new();
        while let Some(chunk) = self.pending.remove(&self.next) {
            ready.push(chunk);
            self.next += 1;
        }
        ready
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

pub struct LogsCommand {
    request: LogsRequest,
    buffer: ReorderBuffer,
}

impl LogsCommand {
    pub fn new(args: LogsArgs, cwd: &Path) -> Result<Self, CliError> {
        let config = ConfigFile::load_optional(cwd)?;
        let request = LogsRequest {
            watch: args.follow,
            timestamps: args.timestamps,
            project: resolve_project_name(args.project.as_deref(), config.as_ref()),
            service_name: args.service,
            since: args.since,
            until: args.until,
            tail: args.tail,
            clear: args.clear,
            config,
        };
        Ok(Self {
            request,
            buffer: ReorderBuffer::default(),
        })
    }

    /// Text ready to print, and whether the stream is over.
    fn accept(&mut self, chunk: LogChunk) -> (String, bool) {
        let mut text = String::new();
        let mut done = false;
        for chunk in self.buffer.push(chunk) {
            text.push_str(&chunk.text);
            if !chunk.text.is_empty() && !chunk.text.ends_with('\n') {
                text.push('\n');
            }
            done |= chunk.last && !self.request.watch;
        }
        (text, done)
    }
}

impl CommandHandler for LogsCommand {
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        _auth: AuthState,
    ) -> Result<Flow, CliError> {
        if self.request.clear {
            warn!("While logs are being cleared the service will be restarted");
            let question = format!(
                "Do you want to clear all logs for the service {}?",
                self.request.service_name
            );
            if !ctx.prompter().confirm(&question, false).await? {
                warn!("Clearing logs is skipped");
                self.request.clear = false;
            }
        }
        ctx.send(Status::Info, Outbound::GetLogs(self.request.clone()))
            .await?;
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        let chunk = match msg.body {
            Inbound::Logs(chunk) => chunk,
            Inbound::LogsHandoff(handoff) => {
                let conn_id = ctx.conn_id().to_string();
                ctx.spawn(async move {
                    let outcome = read_logs(&handoff, &conn_id, std::io::stdout()).await?;
                    Ok(Flow::Exit(outcome))
                });
                return Ok(Flow::Continue);
            }
            _ => {
                debug!(msg_type = %msg.kind, "Ignoring unexpected message");
                return Ok(Flow::Continue);
            }
        };
        let (text, done) = self.accept(chunk);
        if !text.is_empty() {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes())?;
            out.flush()?;
        }
        if done {
            return Ok(Flow::Exit(Outcome::Success));
        }
        Ok(Flow::Continue)
    }
}

/// Post `handoff` to its URL and copy the response body into `out`.
/// A non-2xx status fails the run once the body has been copied.
pub async fn read_logs<W: Write>(
    handoff: &LogsHandoff,
    conn_id: &str,
    mut out: W,
) -> Result<Outcome, CliError> {
    info!(service = %handoff.service_name, url = %handoff.url, "Request of logs");
    let body = serde_json::to_vec(handoff)
        .map_err(|e| CliError::Protocol(format!("failed to encode logs request: {e}")))?;
    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("conhos/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let mut resp = http
        .post(&handoff.url)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .header(HEADER_CONN_ID, conn_id)
        .body(body)
        .send()
        .await?;

    let status = resp.status();
    while let Some(bytes) = resp.chunk().await? {
        out.write_all(&bytes)?;
        out.flush()?;
    }
    info!(service = %handoff.service_name, status = status.as_u16(), "End read logs");
    if status.is_success() {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::fatal(format!(
            "logs request failed with HTTP {}",
            status.as_u16()
        )))
    }
}
