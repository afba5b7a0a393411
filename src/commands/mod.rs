//! Command handlers and the shared runner.
//!
//! Each connected command is a plain struct implementing
//! [`CommandHandler`]; [`run_connected`] resolves the local session, gates
//! unauthenticated commands before any network I/O, and drives the
//! connector. `registry --list` and `login --remove` never connect.

pub mod deploy;
pub mod exec;
pub mod init;
pub mod ip;
pub mod login;
pub mod logs;
pub mod project;
pub mod registry;
pub mod remove;
pub mod service;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::cli::Command;
use crate::config::Settings;
use crate::error::{CliError, Outcome};
use crate::prompt::Prompter;
use crate::protocol::connector::{self, CommandHandler, Connector, PROTOCOL_CLI};
use crate::session::{self, SessionStore};

/// Run one CLI invocation to its outcome.
pub async fn run(command: Command, settings: Settings, prompter: Prompter, cwd: &Path) -> Outcome {
    let settings = Arc::new(settings);
    match command {
        Command::Login(args) => login::run(&args, settings, prompter).await,
        Command::Registry(args) => registry::run(&args, &settings).await,
        Command::Deploy(args) => {
            connected(deploy::DeployCommand::new(&args, cwd), settings, prompter).await
        }
        Command::Exec(args) => connected(exec::ExecCommand::new(args, cwd), settings, prompter).await,
        Command::Logs(args) => connected(logs::LogsCommand::new(args, cwd), settings, prompter).await,
        Command::Init(args) => connected(Ok(init::InitCommand::new(&args, cwd)), settings, prompter).await,
        Command::Ip(args) => connected(ip::IpCommand::new(args, cwd), settings, prompter).await,
        Command::Project(args) => {
            connected(project::ProjectCommand::new(args, cwd), settings, prompter).await
        }
        Command::Service(args) => {
            connected(service::ServiceCommand::new(args, cwd), settings, prompter).await
        }
        Command::Remove => connected(remove::RemoveCommand::new(cwd), settings, prompter).await,
    }
}

/// Handler construction errors (config, usage) end the run before connecting.
async fn connected<H: CommandHandler>(
    handler: Result<H, CliError>,
    settings: Arc<Settings>,
    prompter: Prompter,
) -> Outcome {
    match handler {
        Ok(mut handler) => run_connected(&mut handler, settings, prompter).await,
        Err(e) => e.into(),
    }
}

/// Resolve the session, gate, connect and drive `handler`.
pub async fn run_connected<H: CommandHandler>(
    handler: &mut H,
    settings: Arc<Settings>,
    prompter: Prompter,
) -> Outcome {
    connect_and_run(handler, settings, prompter)
        .await
        .unwrap_or_else(Outcome::from)
}

async fn connect_and_run<H: CommandHandler>(
    handler: &mut H,
    settings: Arc<Settings>,
    prompter: Prompter,
) -> Result<Outcome, CliError> {
    let store = SessionStore::new(settings.session_path());
    let state = session::resolve_session(&store, &prompter).await?;
    if let Err(outcome) = session::gate(&state, handler.allows_login_flow()) {
        return Ok(outcome);
    }

    let url = settings.ws_url()?;
    debug!(url = %url, "Connecting");
    let ws = connector::open(&url, PROTOCOL_CLI).await?;
    Ok(Connector::new(ws, state, settings, prompter).run(handler).await)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{ProjectArgs, ServiceArgs};
    use crate::prompt::testing::ScriptedPrompt;

    #[tokio::test]
    async fn missing_session_is_refused_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = testing::settings_in(dir.path());
        // Not connectable: reaching the connect step would be exit code 2.
        settings.endpoints.websocket = "ftp://nowhere".into();

        let outcome = run(
            Command::Ip(crate::cli::IpArgs {
                project: Some("shop".into()),
            }),
            settings,
            Prompter::new(ScriptedPrompt::default()),
            dir.path(),
        )
        .await;
        assert_eq!(outcome.code(), 1);
    }

    #[tokio::test]
    async fn login_flow_passes_gate_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = testing::settings_in(dir.path());
        settings.endpoints.websocket = "ftp://nowhere".into();

        let outcome = run(
            Command::Login(crate::cli::LoginArgs::default()),
            settings,
            Prompter::new(ScriptedPrompt::default()),
            dir.path(),
        )
        .await;
        assert_eq!(outcome.code(), 2);
    }

    #[tokio::test]
    async fn usage_errors_exit_with_two() {
        let dir = tempfile::tempdir().unwrap();
        let prompter = Prompter::new(ScriptedPrompt::default());

        let outcome = run(
            Command::Project(ProjectArgs::default()),
            testing::settings_in(dir.path()),
            prompter.clone(),
            dir.path(),
        )
        .await;
        assert_eq!(outcome.code(), 2);

        let outcome = run(
            Command::Service(ServiceArgs {
                name: Some("api".into()),
                ..ServiceArgs::default()
            }),
            testing::settings_in(dir.path()),
            prompter.clone(),
            dir.path(),
        )
        .await;
        assert_eq!(outcome.code(), 2);

        let outcome = run(
            Command::Deploy(crate::cli::DeployArgs::default()),
            testing::settings_in(dir.path()),
            prompter,
            dir.path(),
        )
        .await;
        assert_eq!(outcome.code(), 2);
    }
}
