//! `project --delete`: remove a whole project, optionally asking per service.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::cli::ProjectArgs;
use crate::error::CliError;
use crate::project::{resolve_project_name, ConfigFile};
use crate::protocol::message::{ProjectDeleteAcceptData, ProjectDeleteData};
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Inbound, Incoming, Outbound, Status};

pub struct ProjectCommand {
    name: String,
    interactive: bool,
}

impl ProjectCommand {
    /// Only `--delete` is an action; anything else is a usage error.
    pub fn new(args: ProjectArgs, cwd: &Path) -> Result<Self, CliError> {
        if !args.delete {
            return Err(CliError::Usage(
                "nothing to do, use `conhos project --delete`".to_string(),
            ));
        }
        let config = ConfigFile::load_optional(cwd)?;
        Ok(Self {
            name: resolve_project_name(args.project.as_deref(), config.as_ref()),
            interactive: args.interactive,
        })
    }
}

impl CommandHandler for ProjectCommand {
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        _auth: AuthState,
    ) -> Result<Flow, CliError> {
        info!(project = %self.name, "Deleting project");
        let data = ProjectDeleteData {
            name: self.name.clone(),
            interactive: self.interactive,
        };
        ctx.send(Status::Info, Outbound::ProjectDelete(data)).await?;
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        match msg.body {
            Inbound::ProjectDeleteProgress(line) => {
                match msg.status {
                    Status::Error => error!("{}", line.msg),
                    Status::Warn => warn!("{}", line.msg),
                    Status::Info => info!("{}", line.msg),
                }
                Ok(Flow::Continue)
            }
            Inbound::ProjectDeleteAccept(prompt) => {
                let question = if msg.message.is_empty() {
                    format!("Do you want to delete project {}?", prompt.name)
                } else {
                    msg.message
                };
                let value = ctx.prompter().confirm(&question, false).await?;
                let data = ProjectDeleteAcceptData {
                    name: prompt.name,
                    value,
                };
                ctx.send(Status::Info, Outbound::ProjectDeleteAccept(data))
                    .await?;
                Ok(Flow::Continue)
            }
            _ => {
                debug!(msg_type = %msg.kind, "Ignoring unexpected message");
                Ok(Flow::Continue)
            }
        }
    }
}
