//! `ip`: print the project node address.

use std::path::Path;

use tracing::{debug, warn};

use crate::cli::IpArgs;
use crate::error::{CliError, Outcome};
use crate::project::{resolve_project_name, ConfigFile};
use crate::protocol::message::ProjectRef;
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Inbound, Incoming, Outbound, Status};

pub struct IpCommand {
    project: String,
}

impl IpCommand {
    pub fn new(args: IpArgs, cwd: &Path) -> Result<Self, CliError> {
        let config = ConfigFile::load_optional(cwd)?;
        Ok(Self {
            project: resolve_project_name(args.project.as_deref(), config.as_ref()),
        })
    }
}

impl CommandHandler for IpCommand {
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        _auth: AuthState,
    ) -> Result<Flow, CliError> {
        let data = ProjectRef {
            project: self.project.clone(),
        };
        ctx.send(Status::Info, Outbound::Ip(data)).await?;
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        _ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        let Inbound::Ip(reply) = msg.body else {
            debug!(msg_type = %msg.kind, "Ignoring unexpected message");
            return Ok(Flow::Continue);
        };
        match reply.ip.filter(|ip| !ip.is_empty()) {
            Some(ip) => println!("{ip}"),
            None => warn!(project = %self.project, "IP is undefined"),
        }
        Ok(Flow::Exit(Outcome::Success))
    }
}
