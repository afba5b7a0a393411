//! `remove`: delete the project described by the local config from the cloud.

use std::path::Path;

use tracing::{debug, info};

use crate::error::CliError;
use crate::project::ConfigFile;
use crate::protocol::message::ProjectRef;
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Incoming, Outbound, Status};

pub struct RemoveCommand {
    project: String,
}

impl RemoveCommand {
    /// Needs a config file; its project name is the one removed.
    pub fn new(cwd: &Path) -> Result<Self, CliError> {
        let (_, config) = ConfigFile::load(cwd)?;
        Ok(Self {
            project: config.project,
        })
    }
}

impl CommandHandler for RemoveCommand {
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        _auth: AuthState,
    ) -> Result<Flow, CliError> {
        info!(project = %self.project, "Starting remove");
        let data = ProjectRef {
            project: self.project.clone(),
        };
        ctx.send(Status::Info, Outbound::Remove(data)).await?;
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        _ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        debug!(msg_type = %msg.kind, "Ignoring unexpected message");
        Ok(Flow::Continue)
    }
}
