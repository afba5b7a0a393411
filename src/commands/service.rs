//! `service --name <svc> --restart`.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::cli::ServiceArgs;
use crate::error::CliError;
use crate::project::{resolve_project_name, ConfigFile};
use crate::protocol::message::ServiceRestartData;
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Inbound, Incoming, Outbound, Status};

pub struct ServiceCommand {
    project: String,
    service: String,
}

impl ServiceCommand {
    pub fn new(args: ServiceArgs, cwd: &Path) -> Result<Self, CliError> {
        let (Some(service), true) = (args.name, args.restart) else {
            return Err(CliError::Usage(
                "use `conhos service --name <service> --restart`".to_string(),
            ));
        };
        let config = ConfigFile::load_optional(cwd)?;
        Ok(Self {
            project: resolve_project_name(args.project.as_deref(), config.as_ref()),
            service,
        })
    }
}

impl CommandHandler for ServiceCommand {
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        _auth: AuthState,
    ) -> Result<Flow, CliError> {
        info!(project = %self.project, service = %self.service, "Restarting service");
        let data = ServiceRestartData {
            project: self.project.clone(),
            service: self.service.clone(),
        };
        ctx.send(Status::Info, Outbound::ServiceRestart(data)).await?;
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        _ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        let Inbound::ServiceRestartProgress(line) = msg.body else {
            debug!(msg_type = %msg.kind, "Ignoring unexpected message");
            return Ok(Flow::Continue);
        };
        if msg.status == Status::Warn {
            warn!("{}", line.msg);
        } else {
            info!("{}", line.msg);
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::commands::testing::{drive, settings_in, signed_in};
    use crate::error::Outcome;
    use crate::prompt::testing::ScriptedPrompt;
    use crate::protocol::connector::testing::{accept_session, recv_json, send_json, ws_pair};

    #[test]
    fn name_and_restart_are_both_required() {
        let dir = tempfile::tempdir().unwrap();
        let only_restart = ServiceArgs {
            restart: true,
            ..ServiceArgs::default()
        };
        assert_eq!(ServiceCommand::new(only_restart, dir.path()).err().unwrap().exit_code(), 2);

        let both = ServiceArgs {
            name: Some("api".into()),
            restart: true,
            project: Some("shop".into()),
        };
        let cmd = ServiceCommand::new(both, dir.path()).unwrap();
        assert_eq!((cmd.project.as_str(), cmd.service.as_str()), ("shop", "api"));
    }

    #[tokio::test]
    async fn restart_follows_progress_until_end() {
        let dir = tempfile::tempdir().unwrap();
        let (client, mut server) = ws_pair().await;
        let srv = tokio::spawn(async move {
            accept_session(&mut server, "tok123", "u1").await;
            let req = recv_json(&mut server).await.unwrap();
            assert_eq!(req["type"], "serviceRestartServer");
            assert_eq!(req["data"], json!({"project": "shop", "service": "api"}));
            send_json(&mut server, json!({"type": "serviceRestartProgressCli", "data": {"msg": "stopping"}})).await;
            send_json(&mut server, json!({"type": "message", "data": {"msg": "Restarted", "end": true}})).await;
            server
        });

        let mut service = ServiceCommand {
            project: "shop".into(),
            service: "api".into(),
        };
        let outcome = drive(client, signed_in(), settings_in(dir.path()), ScriptedPrompt::default(), &mut service).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome, Outcome::Success);
    }
}
