//! `login`: browser sign-in, session persistence, Docker registry auth.

use std::process::Stdio;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::run_connected;
use crate::cli::LoginArgs;
use crate::config::Settings;
use crate::error::{CliError, Outcome};
use crate::prompt::Prompter;
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Inbound, Incoming, Outbound, Status};
use crate::registry::DockerConfig;
use crate::session::{crypto, SessionRecord, SessionStore};

pub async fn run(args: &LoginArgs, settings: Arc<Settings>, prompter: Prompter) -> Outcome {
    if args.remove {
        return remove_session(&settings).await.unwrap_or_else(Outcome::from);
    }
    let mut handler = LoginCommand::new(args);
    run_connected(&mut handler, settings, prompter).await
}

/// Delete the stored session.
pub async fn remove_session(settings: &Settings) -> Result<Outcome, CliError> {
    let store = SessionStore::new(settings.session_path());
    if store.remove().await? {
        info!(path = %store.path().display(), "Session token was deleted");
    } else {
        warn!(path = %store.path().display(), "Session token file not found");
    }
    Ok(Outcome::Success)
}

pub struct LoginCommand {
    crypt: bool,
    open_url: fn(&str),
}

impl LoginCommand {
    pub fn new(args: &LoginArgs) -> Self {
        Self {
            crypt: args.crypt,
            open_url: open_browser,
        }
    }

    async fn finish(&self, ctx: &mut Context, msg: Incoming) -> Result<Flow, CliError> {
        let Some(token) = msg.token.filter(|t| !t.is_empty()) else {
            warn!("Session token wasn't received from the server");
            if !msg.message.is_empty() {
                warn!("{}", msg.message);
            }
            return Ok(Flow::Exit(Outcome::fatal("login failed: no session token")));
        };
        let uid = msg.user_id.unwrap_or_default();

        let record = if self.crypt {
            info!("Session token will be encrypted with your password");
            let password = ctx.prompter().new_password("Enter a new password").await?;
            let key = crypto::create_key_blocking(password).await?;
            SessionRecord::sealed(crypto::encrypt(&token, &key), uid.as_str())
        } else {
            SessionRecord::plain(token.as_str(), uid.as_str())
        };
        SessionStore::new(ctx.settings().session_path())
            .write(&record)
            .await?;

        if let Err(e) = write_docker_auth(ctx.settings(), &uid, &token).await {
            warn!(error = %e, "Docker config is not changed");
        }

        info!("Successfully logged in");
        Ok(Flow::Exit(Outcome::Success))
    }
}

impl CommandHandler for LoginCommand {
    fn allows_login_flow(&self) -> bool {
        true
    }

    fn skip_set_project(&self) -> bool {
        true
    }

    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        auth: AuthState,
    ) -> Result<Flow, CliError> {
        if auth.session_exists && !auth.failed_login {
            info!("You have already signed in");
            return Ok(Flow::Exit(Outcome::Success));
        }

        info!("Trying to create a new session");
        let conn_id = ctx.conn_id().to_string();
        ctx.send(Status::Info, Outbound::Login(conn_id.clone()))
            .await?;
        let url = ctx.settings().login_url(&conn_id);
        info!(url = %url, "Login via browser");
        (self.open_url)(&url);
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        match msg.body {
            Inbound::Login => self.finish(ctx, msg).await,
            _ => {
                debug!(msg_type = %msg.kind, "Not handled by login");
                Ok(Flow::Continue)
            }
        }
    }
}

/// Store `uid:token` for the registry host in the Docker config.
pub async fn write_docker_auth(settings: &Settings, uid: &str, token: &str) -> Result<(), CliError> {
    let path = settings.docker_config_path();
    let mut config = if let Some(config) = DockerConfig::read(&path).await? {
        config
    } else {
        info!(path = %path.display(), "Docker config file does not exist, creating it");
        DockerConfig::default()
    };
    config.set_credentials(&settings.endpoints.registry, uid, token);
    config.write(&path).await?;
    info!(path = %path.display(), "Docker config changed");
    Ok(())
}

fn open_browser(url: &str) {
    let mut command = if cfg!(target_os = "macos") {
        tokio::process::Command::new("open")
    } else if cfg!(windows) {
        let mut c = tokio::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        tokio::process::Command::new("xdg-open")
    };
    let spawned = command
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(_) => debug!("Browser opened"),
        Err(e) => warn!(error = %e, "Could not open a browser, open the link manually"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::commands::testing::{drive, settings_in, signed_in};
    use crate::prompt::testing::{Answer, ScriptedPrompt};
    use crate::protocol::connector::testing::{accept_session, recv_json, send_json, ws_pair};
    use crate::session::SessionState;

    static OPENED: std::sync::Mutex<Vec<String>> = std::sync::Mutex::new(Vec::new());

    fn handler(crypt: bool) -> LoginCommand {
        LoginCommand {
            crypt,
            open_url: |_| {},
        }
    }

    #[tokio::test]
    async fn new_session_is_stored_with_docker_auth() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let (client, mut server) = ws_pair().await;

        let srv = tokio::spawn(async move {
            let hello = recv_json(&mut server).await.unwrap();
            assert_eq!(hello["connId"], "");
            send_json(&mut server, json!({"type": "setSocketCli", "data": null, "connId": "srv-123"})).await;
            let login = recv_json(&mut server).await.unwrap();
            assert_eq!(login["type"], "loginServer");
            assert_eq!(login["data"], "srv-123");
            assert_eq!(login["connId"], "srv-123");
            send_json(
                &mut server,
                json!({"type": "loginCli", "status": "info", "data": null, "token": "tok9", "userId": "u9"}),
            )
            .await;
            server
        });

        let mut login = LoginCommand {
            crypt: false,
            open_url: |url| OPENED.lock().unwrap().push(url.to_string()),
        };
        let outcome = drive(client, SessionState::Missing, settings.clone(), ScriptedPrompt::default(), &mut login).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome, Outcome::Success);
        let expected = settings.login_url("srv-123");
        assert!(OPENED.lock().unwrap().contains(&expected));

        let record = SessionStore::new(settings.session_path()).read().await.unwrap().unwrap();
        assert_eq!(record, SessionRecord::plain("tok9", "u9"));
        let docker = DockerConfig::read(&settings.docker_config_path()).await.unwrap().unwrap();
        assert_eq!(
            docker.credentials(&settings.endpoints.registry),
            Some(("u9".to_string(), "tok9".to_string()))
        );
    }

    #[tokio::test]
    async fn crypt_stores_encrypted_session() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let (client, mut server) = ws_pair().await;

        let srv = tokio::spawn(async move {
            recv_json(&mut server).await.unwrap();
            send_json(&mut server, json!({"type": "setSocket", "data": null})).await;
            recv_json(&mut server).await.unwrap();
            send_json(&mut server, json!({"type": "login", "data": null, "token": "tok9", "userId": "u9"})).await;
            server
        });

        let prompt = ScriptedPrompt::new([Answer::Text("pw".into())]);
        let mut login = handler(true);
        let outcome = drive(client, SessionState::Missing, settings.clone(), prompt, &mut login).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome, Outcome::Success);

        let record = SessionStore::new(settings.session_path()).read().await.unwrap().unwrap();
        assert!(record.is_encrypted());
        let key = crypto::create_key("pw").unwrap();
        assert_eq!(crypto::decrypt(&record.to_sealed(), &key).as_deref(), Some("tok9"));
    }

    #[tokio::test]
    async fn valid_session_is_already_signed_in() {
        let dir = tempfile::tempdir().unwrap();
        let (client, mut server) = ws_pair().await;
        let srv = tokio::spawn(async move {
            accept_session(&mut server, "tok123", "u1").await;
            server
        });

        let mut login = handler(false);
        let outcome = drive(client, signed_in(), settings_in(dir.path()), ScriptedPrompt::default(), &mut login).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn login_reply_without_token_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let (client, mut server) = ws_pair().await;
        let srv = tokio::spawn(async move {
            recv_json(&mut server).await.unwrap();
            send_json(&mut server, json!({"type": "setSocket", "data": null})).await;
            recv_json(&mut server).await.unwrap();
            send_json(&mut server, json!({"type": "loginCli", "data": null, "message": "expired"})).await;
            server
        });

        let mut login = handler(false);
        let outcome = drive(client, SessionState::Missing, settings.clone(), ScriptedPrompt::default(), &mut login).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome.code(), 1);
        assert!(!settings.session_path().exists());
    }

    #[tokio::test]
    async fn remove_deletes_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let store = SessionStore::new(settings.session_path());
        store.write(&SessionRecord::plain("t", "u")).await.unwrap();

        assert_eq!(remove_session(&settings).await.unwrap(), Outcome::Success);
        assert!(!settings.session_path().exists());
        assert_eq!(remove_session(&settings).await.unwrap(), Outcome::Success);
    }
}
