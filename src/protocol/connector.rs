//! The protocol connector: one WebSocket per invocation, a fixed opening
//! handshake, and the dispatch rules every command shares.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting ─▶ HandshakeSent ─▶ AwaitingSessionCheck ─┬▶ Authenticated ───┬▶ RunningHandler ─▶ Terminal
//!                                                      └▶ Unauthenticated ─┘
//! ```
//!
//! - `setSocketServer` is sent as soon as the socket is up, with an empty
//!   connection id.
//! - The server's `setSocket` assigns the connection id (minted locally
//!   when it sends none); then the stored token goes out in
//!   `checkTokenServer`; with no usable token the login-capable command
//!   is started directly as unauthenticated.
//! - `checkToken` authorizes the session and runs the command's
//!   [`CommandHandler::on_authenticated`] exactly once.
//! - `message` frames are handled here: `status: error` ends the run with
//!   exit code 1 at once, `end: true` ends it cleanly after background jobs
//!   finish.
//! - Every other known type is forwarded to the handler; unknown types are
//!   logged and ignored; malformed frames are dropped.
//!
//! Outgoing envelopes go through an mpsc queue drained by a writer task, so
//! background jobs (the deploy upload) can send while the read loop keeps
//! dispatching.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{
    self, CheckTokenData, Credentials, Envelope, Inbound, Incoming, Outbound, SetSocketData,
    Status, StatusLine, TokenCheck,
};
use crate::config::Settings;
use crate::error::{CliError, Outcome};
use crate::prompt::Prompter;
use crate::session::SessionState;

/// Subprotocol of the primary connection.
pub const PROTOCOL_CLI: &str = "cli";

const OUTBOX_CAPACITY: usize = 256;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect to `url` announcing `subprotocol`.
pub async fn open(url: &str, subprotocol: &'static str) -> Result<ClientStream, CliError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| CliError::Config(format!("invalid endpoint {url}: {e}")))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(subprotocol));
    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| CliError::Transport(format!("failed to connect to {url}: {e}")))?;
    Ok(ws)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    HandshakeSent,
    AwaitingSessionCheck,
    Unauthenticated,
    Authenticated,
    RunningHandler,
    Terminal,
}

/// Passed to the handler when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthState {
    /// The stored session could not be used (wrong password or rejected token).
    pub failed_login: bool,
    pub session_exists: bool,
}

/// What the connector does after a handler step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(Outcome),
}

/// Per-command behavior layered on the shared dispatch.
#[allow(async_fn_in_trait)]
pub trait CommandHandler {
    /// Only `login` runs when there is no usable session.
    fn allows_login_flow(&self) -> bool {
        false
    }

    fn skip_set_project(&self) -> bool {
        false
    }

    /// Runs once, after the session check settles.
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        auth: AuthState,
    ) -> Result<Flow, CliError>;

    /// Command-specific frames, delivered in arrival order.
    async fn handle_message(&mut self, ctx: &mut Context, msg: Incoming)
        -> Result<Flow, CliError>;
}

/// Cloneable sending half, usable from background jobs.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Envelope>,
    creds: Credentials,
}

impl Outbox {
    pub fn new(tx: mpsc::Sender<Envelope>, creds: Credentials) -> Self {
        Self { tx, creds }
    }

    pub async fn send(&self, status: Status, body: Outbound) -> Result<(), CliError> {
        self.tx
            .send(Envelope::new(status, body, &self.creds))
            .await
            .map_err(|_| CliError::Transport("connection is closed".to_string()))
    }
}

/// Handler-facing view of the connection.
pub struct Context {
    creds: Credentials,
    tx: mpsc::Sender<Envelope>,
    settings: Arc<Settings>,
    prompter: Prompter,
    jobs: JoinSet<Result<Flow, CliError>>,
    pending_exit: Option<Outcome>,
}

impl Context {
    pub fn outbox(&self) -> Outbox {
        Outbox::new(self.tx.clone(), self.creds.clone())
    }

    pub async fn send(&self, status: Status, body: Outbound) -> Result<(), CliError> {
        self.outbox().send(status, body).await
    }

    /// Run `job` alongside the read loop. An `Exit` from the job ends the run;
    /// a clean `end` from the server waits until every job has finished.
    pub fn spawn<F>(&mut self, job: F)
    where
        F: Future<Output = Result<Flow, CliError>> + Send + 'static,
    {
        self.jobs.spawn(job);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn prompter(&self) -> &Prompter {
        &self.prompter
    }

    pub fn conn_id(&self) -> &str {
        &self.creds.conn_id
    }

    pub fn token(&self) -> Option<&str> {
        self.creds.token.as_deref()
    }

    pub fn user_id(&self) -> &str {
        &self.creds.user_id
    }
}

/// Drives one connection from handshake to a terminal outcome.
pub struct Connector<S> {
    ws: WebSocketStream<S>,
    session: SessionState,
    settings: Arc<Settings>,
    prompter: Prompter,
}

impl<S> Connector<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        ws: WebSocketStream<S>,
        session: SessionState,
        settings: Arc<Settings>,
        prompter: Prompter,
    ) -> Self {
        Self {
            ws,
            session,
            settings,
            prompter,
        }
    }

    pub async fn run<H: CommandHandler>(self, handler: &mut H) -> Outcome {
        self.run_traced(handler).await.0
    }

    /// Like [`Connector::run`], also returning every phase visited.
    pub async fn run_traced<H: CommandHandler>(self, handler: &mut H) -> (Outcome, Vec<Phase>) {
        let (sink, mut stream) = self.ws.split();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let writer = tokio::spawn(write_loop(sink, rx));

        debug!("Connection open");
        let creds = Credentials {
            token: None,
            user_id: self.session.uid().to_string(),
            conn_id: String::new(),
        };
        let mut machine = Machine {
            phase: Phase::Connecting,
            trace: vec![Phase::Connecting],
            session: self.session,
            ctx: Context {
                creds,
                tx,
                settings: self.settings,
                prompter: self.prompter,
                jobs: JoinSet::new(),
                pending_exit: None,
            },
        };

        let outcome = machine.drive(&mut stream, handler).await;
        let trace = machine.finish(writer).await;
        (outcome, trace)
    }
}

enum Event {
    Frame(Option<Result<Message, tungstenite::Error>>),
    Job(Option<Result<Result<Flow, CliError>, JoinError>>),
}

struct Machine {
    phase: Phase,
    trace: Vec<Phase>,
    session: SessionState,
    ctx: Context,
}

impl Machine {
    fn transition(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "Phase change");
        self.phase = next;
        self.trace.push(next);
    }

    async fn drive<St, H>(&mut self, stream: &mut St, handler: &mut H) -> Outcome
    where
        St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
        H: CommandHandler,
    {
        if let Err(e) = self.handshake().await {
            self.transition(Phase::Terminal);
            return e.into();
        }

        loop {
            let event = tokio::select! {
                biased;
                frame = stream.next() => Event::Frame(frame),
                joined = self.ctx.jobs.join_next(), if !self.ctx.jobs.is_empty() => Event::Job(joined),
            };

            let flow = match event {
                Event::Frame(frame) => self.on_frame(frame, handler).await,
                Event::Job(joined) => Ok(on_job(joined)),
            }
            .unwrap_or_else(|e| Flow::Exit(e.into()));

            if let Flow::Exit(outcome) = flow {
                self.transition(Phase::Terminal);
                return outcome;
            }
            if self.ctx.jobs.is_empty() {
                if let Some(outcome) = self.ctx.pending_exit.take() {
                    self.transition(Phase::Terminal);
                    return outcome;
                }
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), CliError> {
        let hello = SetSocketData {
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        self.ctx
            .send(Status::Info, Outbound::SetSocket(hello))
            .await?;
        self.transition(Phase::HandshakeSent);
        Ok(())
    }

    async fn on_frame<H: CommandHandler>(
        &mut self,
        frame: Option<Result<Message, tungstenite::Error>>,
        handler: &mut H,
    ) -> Result<Flow, CliError> {
        match frame {
            Some(Ok(Message::Text(text))) => self.dispatch(&text, handler).await,
            Some(Ok(Message::Binary(bytes))) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                self.dispatch(&text, handler).await
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Connection closed by server");
                Ok(Flow::Exit(Outcome::fatal("connection closed by server")))
            }
            Some(Ok(_)) => Ok(Flow::Continue),
            Some(Err(e)) => Ok(Flow::Exit(Outcome::fatal(format!("connection error: {e}")))),
            None => Ok(Flow::Exit(Outcome::fatal("connection closed"))),
        }
    }

    async fn dispatch<H: CommandHandler>(
        &mut self,
        text: &str,
        handler: &mut H,
    ) -> Result<Flow, CliError> {
        let incoming = match message::decode(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                return Ok(Flow::Continue);
            }
        };
        debug!(msg_type = %incoming.kind, status = ?incoming.status, "Received");

        match incoming.body {
            Inbound::SetSocket => self.on_set_socket(incoming.conn_id, handler).await,
            Inbound::CheckToken(check) => {
                self.on_check_token(check, incoming.token, incoming.user_id, handler)
                    .await
            }
            Inbound::Message(line) => Ok(self.on_status_line(incoming.status, &line)),
            Inbound::Unknown(kind) => {
                warn!(msg_type = %kind, "Unknown message type");
                Ok(Flow::Continue)
            }
            _ if self.phase == Phase::RunningHandler => {
                handler.handle_message(&mut self.ctx, incoming).await
            }
            _ => {
                warn!(msg_type = %incoming.kind, phase = ?self.phase, "Ignoring message before authentication");
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_set_socket<H: CommandHandler>(
        &mut self,
        conn_id: Option<String>,
        handler: &mut H,
    ) -> Result<Flow, CliError> {
        if self.phase != Phase::HandshakeSent {
            warn!(phase = ?self.phase, "Unexpected setSocket");
            return Ok(Flow::Continue);
        }
        self.transition(Phase::AwaitingSessionCheck);
        self.ctx.creds.conn_id = conn_id.unwrap_or_else(|| {
            debug!("Server assigned no connection id, minting one");
            Uuid::new_v4().to_string()
        });
        debug!(conn_id = %self.ctx.creds.conn_id, "Socket registered");

        let failed_login = match &self.session {
            SessionState::Token { token, .. } => {
                self.ctx.creds.token = Some(token.clone());
                let check = CheckTokenData {
                    skip_set_project: handler.skip_set_project(),
                };
                self.ctx.send(Status::Info, Outbound::CheckToken(check)).await?;
                return Ok(Flow::Continue);
            }
            SessionState::Missing => false,
            SessionState::Locked { .. } => true,
        };

        if !handler.allows_login_flow() {
            return Ok(Flow::Exit(Outcome::fatal(
                "You are not authenticated, run `conhos login` first",
            )));
        }
        let auth = AuthState {
            failed_login,
            session_exists: failed_login,
        };
        self.start_handler(handler, auth, Phase::Unauthenticated).await
    }

    async fn on_check_token<H: CommandHandler>(
        &mut self,
        check: TokenCheck,
        token: Option<String>,
        user_id: Option<String>,
        handler: &mut H,
    ) -> Result<Flow, CliError> {
        if self.phase != Phase::AwaitingSessionCheck {
            warn!(phase = ?self.phase, "Unexpected checkToken");
            return Ok(Flow::Continue);
        }

        let token = token.or_else(|| self.ctx.creds.token.clone());
        if !check.checked || token.is_none() {
            if let Some(reason) = &check.error {
                warn!(reason = %reason, "Session rejected by server");
            }
            if !handler.allows_login_flow() {
                return Ok(Flow::Exit(Outcome::fatal(
                    "Session is not valid, run `conhos login` to sign in again",
                )));
            }
            let auth = AuthState {
                failed_login: true,
                session_exists: true,
            };
            return self.start_handler(handler, auth, Phase::Unauthenticated).await;
        }

        self.ctx.creds.token = token;
        if let Some(uid) = user_id.filter(|u| !u.is_empty()) {
            self.ctx.creds.user_id = uid;
        }
        debug!(user_id = %self.ctx.creds.user_id, "Session verified");
        let auth = AuthState {
            failed_login: false,
            session_exists: true,
        };
        self.start_handler(handler, auth, Phase::Authenticated).await
    }

    async fn start_handler<H: CommandHandler>(
        &mut self,
        handler: &mut H,
        auth: AuthState,
        via: Phase,
    ) -> Result<Flow, CliError> {
        self.transition(via);
        self.transition(Phase::RunningHandler);
        handler.on_authenticated(&mut self.ctx, auth).await
    }

    fn on_status_line(&mut self, status: Status, line: &StatusLine) -> Flow {
        match status {
            Status::Error => {
                let reason = if line.msg.is_empty() {
                    "server reported an error".to_string()
                } else {
                    line.msg.clone()
                };
                return Flow::Exit(Outcome::fatal(reason));
            }
            Status::Warn if !line.msg.is_empty() => warn!("{}", line.msg),
            Status::Info if !line.msg.is_empty() => info!("{}", line.msg),
            Status::Warn | Status::Info => {}
        }

        if line.end {
            if self.ctx.jobs.is_empty() {
                return Flow::Exit(Outcome::Success);
            }
            debug!(jobs = self.ctx.jobs.len(), "End received, waiting for background jobs");
            self.ctx.pending_exit = Some(Outcome::Success);
        }
        Flow::Continue
    }

    /// Stop jobs, let the writer flush, and return the phase trace.
    async fn finish(self, writer: tokio::task::JoinHandle<Result<(), CliError>>) -> Vec<Phase> {
        let Machine { mut ctx, trace, .. } = self;
        ctx.jobs.shutdown().await;
        drop(ctx);
        match tokio::time::timeout(FLUSH_TIMEOUT, writer).await {
            Ok(Ok(Err(e))) => debug!(error = %e, "Writer stopped with error"),
            Ok(Err(e)) => debug!(error = %e, "Writer task failed"),
            Err(_) => debug!("Timed out flushing outgoing messages"),
            Ok(Ok(Ok(()))) => {}
        }
        trace
    }
}

fn on_job(joined: Option<Result<Result<Flow, CliError>, JoinError>>) -> Flow {
    match joined {
        None => Flow::Continue,
        Some(Ok(Ok(flow))) => flow,
        Some(Ok(Err(e))) => Flow::Exit(e.into()),
        Some(Err(e)) => Flow::Exit(Outcome::fatal(format!("background task failed: {e}"))),
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<Envelope>,
) -> Result<(), CliError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        let text = serde_json::to_string(&envelope)
            .map_err(|e| CliError::Protocol(format!("failed to encode message: {e}")))?;
        debug!(msg_type = envelope.body.kind(), bytes = text.len(), "Sending");
        sink.send(Message::Text(text.into())).await?;
    }
    sink.close().await?;
    Ok(())
}
