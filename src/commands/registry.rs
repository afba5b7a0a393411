//! `registry --list`: list the user's repositories over HTTP.

use tracing::info;

use crate::cli::RegistryArgs;
use crate::config::Settings;
use crate::error::{CliError, Outcome};
use crate::registry::{DockerConfig, RegistryClient};

pub async fn run(args: &RegistryArgs, settings: &Settings) -> Outcome {
    if !args.list {
        return CliError::Usage("nothing to do, use `conhos registry --list`".to_string()).into();
    }
    match list(settings).await {
        Ok(repositories) => {
            info!("Repositories:");
            for repository in repositories {
                println!("{repository}");
            }
            Outcome::Success
        }
        Err(e) => e.into(),
    }
}

/// Repositories visible with the credentials `login` stored.
pub async fn list(settings: &Settings) -> Result<Vec<String>, CliError> {
    let unauthorized = || CliError::Auth("Unauthorized, run `conhos login` first".to_string());
    let config = DockerConfig::read(&settings.docker_config_path())
        .await?
        .ok_or_else(unauthorized)?;
    let (user, password) = config
        .credentials(&settings.endpoints.registry)
        .ok_or_else(unauthorized)?;

    let client = RegistryClient::new(&settings.endpoints)?;
    let token = client.authenticate(&user, &password).await?;
    client.catalog(&user, &token).await
}
