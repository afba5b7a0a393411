//! `deploy`: pack the project, stream it, and follow the server's deploy.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::archive::{self, Excludes};
use crate::cli::DeployArgs;
use crate::error::{CliError, Outcome};
use crate::progress::{finish_status_line, write_status_line};
use crate::project::ConfigFile;
use crate::protocol::message::{AcceptDeleteData, AcceptDeletePrompt};
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Inbound, Incoming, Outbound, Status};
use crate::upload::{self, ChunkReader, CHUNK_SIZE};

pub struct DeployCommand {
    root: PathBuf,
    config: ConfigFile,
    yes: bool,
    chunk_size: usize,
}

impl DeployCommand {
    /// Fails with a config error when the project has no valid config file.
    pub fn new(args: &DeployArgs, cwd: &Path) -> Result<Self, CliError> {
        let (path, config) = ConfigFile::load(cwd)?;
        info!(path = %path.display(), project = %config.project, "Config loaded");
        Ok(Self {
            root: cwd.to_path_buf(),
            config,
            yes: args.yes,
            chunk_size: CHUNK_SIZE,
        })
    }

    async fn accept_delete(
        &self,
        ctx: &Context,
        prompt: AcceptDeletePrompt,
    ) -> Result<Flow, CliError> {
        warn!(
            service = %prompt.service_name,
            kind = %prompt.service_type,
            "Service will be deleted, save any data you need from it first"
        );
        let accept = self.yes
            || ctx
                .prompter()
                .confirm(
                    &format!(
                        "Do you want to delete service \"{}\" with all data?",
                        prompt.service_name
                    ),
                    false,
                )
                .await?;
        if !accept {
            info!("Deletion canceled by user");
            return Ok(Flow::Exit(Outcome::fatal("deletion canceled by user")));
        }
        let data = AcceptDeleteData {
            service_name: prompt.service_name,
            accept: true,
        };
        ctx.send(Status::Info, Outbound::AcceptDelete(data)).await?;
        Ok(Flow::Continue)
    }
}

impl CommandHandler for DeployCommand {
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        _auth: AuthState,
    ) -> Result<Flow, CliError> {
        let project = self.config.project.clone();
        info!(project = %project, "Starting deploy project");

        let packed = archive::pack(&self.root, &project, Excludes::new(&self.config.exclude)).await?;
        let outbox = ctx.outbox();
        let config = self.config.clone();
        let chunk_size = self.chunk_size;

        ctx.spawn(async move {
            let mut reader = ChunkReader::open(&packed.path, chunk_size).await?;
            let mut shown = None;
            let chunks = upload::stream_archive(&outbox, &mut reader, &project, config, |p| {
                let percent = p.percent();
                if shown != Some(percent) {
                    write_status_line(&format!("Uploading {percent}%"));
                    shown = Some(percent);
                }
            })
            .await?;
            finish_status_line();
            info!(chunks, bytes = packed.size, "Project uploaded");
            drop(packed);
            Ok(Flow::Continue)
        });
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        match msg.body {
            Inbound::AcceptDelete(prompt) => self.accept_delete(ctx, prompt).await,
            Inbound::DeployProgress(line) => {
                if msg.status == Status::Warn {
                    warn!("{}", line.msg);
                } else {
                    write_status_line(&line.msg);
                }
                Ok(Flow::Continue)
            }
            _ => {
                debug!(msg_type = %msg.kind, "Ignoring unexpected message");
                Ok(Flow::Continue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use flate2::read::GzDecoder;
    use serde_json::json;

    use super::*;
    use crate::commands::testing::{drive, settings_in, signed_in};
    use crate::prompt::testing::{Answer, ScriptedPrompt};
    use crate::protocol::connector::testing::{accept_session, recv_json, send_json, ws_pair};

    const CONFIG: &str = "project: shop\nservices:\n  api:\n    type: node\n    size: micro\n    ports:\n      - port: 3000\n        type: http\n";

    fn project_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conhos.yaml"), CONFIG).unwrap();
        std::fs::write(dir.path().join("index.js"), "console.log(1)\n".repeat(2000)).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        std::fs::write(dir.path().join("node_modules/dep/x.js"), "x").unwrap();
        dir
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeployCommand::new(&DeployArgs::default(), dir.path()).err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn uploads_chunks_then_accepts_deletion_and_ends() {
        let dir = project_dir();
        let settings = settings_in(dir.path());
        let (client, mut server) = ws_pair().await;

        let srv = tokio::spawn(async move {
            accept_session(&mut server, "tok123", "u1").await;
            let mut archive = Vec::new();
            let mut expected = 0;
            loop {
                let msg = recv_json(&mut server).await.unwrap();
                assert_eq!(msg["type"], "deploy");
                let data = &msg["data"];
                assert_eq!(data["num"], expected);
                assert_eq!(data["project"], "shop");
                expected += 1;
                if data["last"] == true {
                    assert_eq!(data["chunk"], "");
                    assert_eq!(data["config"]["services"]["api"]["type"], "node");
                    break;
                }
                assert!(data["config"].is_null());
                archive.extend(BASE64.decode(data["chunk"].as_str().unwrap()).unwrap());
            }

            send_json(
                &mut server,
                json!({"type": "acceptDeleteCli", "data": {"serviceName": "old", "serviceType": "redis"}}),
            )
            .await;
            let accept = recv_json(&mut server).await.unwrap();
            assert_eq!(accept["type"], "acceptDeleteServer");
            assert_eq!(accept["data"], json!({"serviceName": "old", "accept": true}));

            send_json(&mut server, json!({"type": "deployProgressCli", "status": "info", "data": {"msg": "building"}})).await;
            send_json(&mut server, json!({"type": "message", "status": "info", "data": {"msg": "Deployed", "end": true}})).await;
            (server, archive)
        });

        let mut deploy = DeployCommand::new(&DeployArgs::default(), dir.path()).unwrap();
        deploy.chunk_size = 1024;
        let prompt = ScriptedPrompt::new([Answer::Yes(true)]);
        let outcome = drive(client, signed_in(), settings, prompt, &mut deploy).await;
        let (_server, archive) = srv.await.unwrap();
        assert_eq!(outcome, Outcome::Success);

        let mut tar = tar::Archive::new(GzDecoder::new(archive.as_slice()));
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["index.js"]);
    }

    #[tokio::test]
    async fn declined_deletion_exits_with_failure() {
        let dir = project_dir();
        let settings = settings_in(dir.path());
        let (client, mut server) = ws_pair().await;

        let srv = tokio::spawn(async move {
            accept_session(&mut server, "tok123", "u1").await;
            while recv_json(&mut server).await.unwrap()["data"]["last"] != true {}
            send_json(
                &mut server,
                json!({"type": "acceptDelete", "data": {"serviceName": "db", "serviceType": "mysql"}}),
            )
            .await;
            server
        });

        let mut deploy = DeployCommand::new(&DeployArgs::default(), dir.path()).unwrap();
        let prompt = ScriptedPrompt::new([Answer::Yes(false)]);
        let outcome = drive(client, signed_in(), settings, prompt, &mut deploy).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome.code(), 1);
    }
}
