//! `exec`: ask for a terminal URL, then bridge stdin/stdout to it.

use std::path::Path;

use tokio::io::BufReader;
use tracing::{debug, info};

use crate::cli::ExecArgs;
use crate::error::CliError;
use crate::project::{resolve_project_name, ConfigFile};
use crate::protocol::connector;
use crate::protocol::message::ExecRequest;
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Inbound, Incoming, Outbound, Status};
use crate::terminal::{self, ExecSession, PROTOCOL_TERMINAL};

pub struct ExecCommand {
    service: String,
    project: String,
    repl: u32,
}

impl ExecCommand {
    pub fn new(args: ExecArgs, cwd: &Path) -> Result<Self, CliError> {
        let config = ConfigFile::load_optional(cwd)?;
        Ok(Self {
            project: resolve_project_name(args.project.as_deref(), config.as_ref()),
            service: args.service,
            repl: args.repl,
        })
    }
}

impl CommandHandler for ExecCommand {
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        _auth: AuthState,
    ) -> Result<Flow, CliError> {
        let request = ExecRequest {
            service: self.service.clone(),
            project: self.project.clone(),
            repl: self.repl,
        };
        ctx.send(Status::Info, Outbound::Exec(request)).await?;
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        let Inbound::Exec(handoff) = msg.body else {
            debug!(msg_type = %msg.kind, "Ignoring unexpected message");
            return Ok(Flow::Continue);
        };
        info!(url = %handoff.url, "Connecting to terminal");
        let service = self.service.clone();
        ctx.spawn(async move {
            let ws = connector::open(&handoff.url, PROTOCOL_TERMINAL).await?;
            let mut session = ExecSession::new(service);
            let outcome = terminal::run_bridge(
                ws,
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
                &mut session,
            )
            .await;
            Ok(Flow::Exit(outcome))
        });
        Ok(Flow::Continue)
    }
}
