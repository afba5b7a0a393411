//! `init`: build `conhos.yaml` from the server's service catalog.
//!
//! The catalog (`deployData`) lists service kinds with their image tags and
//! the available sizes with a pricing basis. With `--yes` a single Node.js
//! service is written without asking; otherwise the user picks services one
//! by one. An existing config is only replaced after confirmation, or
//! extended in place.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::cli::InitArgs;
use crate::error::{CliError, Outcome};
use crate::project::{
    dir_name, find_config_file, ConfigFile, Environment, Port, Service, CONFIG_FILE_NAMES,
    PORT_MAX, PORT_TYPES,
};
use crate::prompt::Prompter;
use crate::protocol::message::{DeployData, ServiceTemplate, SizeOption};
use crate::protocol::{AuthState, CommandHandler, Context, Flow, Inbound, Incoming, Outbound, Status};

/// Preselected entry of the size list.
pub const SIZE_INDEX_DEFAULT: usize = 3;
pub const CURRENCY: &str = "RUB";
const PORT_DEFAULT: u32 = 3000;
const PHP_FPM_PORT: u32 = 9000;
const HOURS_PER_MONTH: f64 = 30.0 * 24.0;
const NODE_COMMAND: &str = "npm i && npm run start";

/// Kinds built from the project sources; they get ports and a start command.
const CUSTOM_SERVICES: [&str; 7] = ["node", "rust", "python", "golang", "php", "ruby", "custom"];

static PROJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z\-_.]+$").expect("Invalid project name regex"));

pub struct InitCommand {
    root: PathBuf,
    path: PathBuf,
    yes: bool,
    /// Existing config to extend instead of starting over.
    base: Option<ConfigFile>,
}

impl InitCommand {
    pub fn new(args: &InitArgs, cwd: &Path) -> Self {
        Self {
            root: cwd.to_path_buf(),
            path: find_config_file(cwd).unwrap_or_else(|| cwd.join(CONFIG_FILE_NAMES[0])),
            yes: args.yes,
            base: None,
        }
    }

    /// `false` when the user keeps the existing file.
    async fn resolve_existing(&mut self, prompter: &Prompter) -> Result<bool, CliError> {
        info!(path = %self.path.display(), "Config file exists");
        if self.yes {
            return Ok(false);
        }
        let choice = prompter
            .select(
                "What do you want to do with the old config file?",
                vec!["Overwrite".to_string(), "Add new service".to_string()],
                0,
            )
            .await?;
        if choice == 1 {
            let (_, config) = ConfigFile::load(&self.root)?;
            self.base = Some(config);
            return Ok(true);
        }
        warn!("Overwriting the config drops its services; the next deploy deletes them from the cloud with all their data");
        prompter
            .confirm("Do you want to overwrite the config file?", false)
            .await
    }

    async fn build(&mut self, prompter: &Prompter, data: &DeployData) -> Result<ConfigFile, CliError> {
        let mut config = match self.base.take() {
            Some(config) => config,
            None => ConfigFile {
                project: ask_project_name(prompter, &dir_name(&self.root)).await?,
                services: IndexMap::new(),
                exclude: Vec::new(),
                extra: IndexMap::new(),
            },
        };
        loop {
            let (name, service) = ask_service(prompter, data, &config).await?;
            info!(service = %name, "Adding service to the config file");
            config.services.insert(name, service);
            if !prompter
                .confirm("Do you want to add another service?", false)
                .await?
            {
                return Ok(config);
            }
        }
    }
}

impl CommandHandler for InitCommand {
    async fn on_authenticated(
        &mut self,
        ctx: &mut Context,
        _auth: AuthState,
    ) -> Result<Flow, CliError> {
        info!("Starting init");
        if self.path.exists() && !self.resolve_existing(ctx.prompter()).await? {
            info!("This project has been initialized before");
            return Ok(Flow::Exit(Outcome::Success));
        }
        ctx.send(Status::Info, Outbound::GetDeployData(())).await?;
        Ok(Flow::Continue)
    }

    async fn handle_message(
        &mut self,
        ctx: &mut Context,
        msg: Incoming,
    ) -> Result<Flow, CliError> {
        let Inbound::DeployData(data) = msg.body else {
            debug!(msg_type = %msg.kind, "Ignoring unexpected message");
            return Ok(Flow::Continue);
        };
        let config = if self.yes {
            default_config(&data, &dir_name(&self.root))?
        } else {
            self.build(ctx.prompter(), &data).await?
        };
        config.validate()?;
        config.write(&self.path)?;
        info!(path = %self.path.display(), "Project successfully initialized");
        Ok(Flow::Exit(Outcome::Success))
    }
}

/// One Node.js service with default size, port and command.
pub fn default_config(data: &DeployData, project: &str) -> Result<ConfigFile, CliError> {
    let version = data
        .services
        .iter()
        .find(|t| t.kind == "node")
        .and_then(|t| t.tags.first())
        .map_or("latest", String::as_str);
    let size = default_size(&data.sizes)
        .ok_or_else(|| CliError::Protocol("server sent no service sizes".to_string()))?;

    let service = Service {
        kind: "node".to_string(),
        active: true,
        size: size.name.clone(),
        image: None,
        version: Some(version.to_string()),
        command: Some(NODE_COMMAND.to_string()),
        ports: vec![Port {
            port: PORT_DEFAULT,
            kind: PORT_TYPES[0].to_string(),
            timeout: None,
        }],
        domains: IndexMap::new(),
        environment: Environment::List(vec![format!("PORT={PORT_DEFAULT}")]),
        extra: IndexMap::new(),
    };
    Ok(ConfigFile {
        project: project.to_string(),
        services: IndexMap::from([("node0".to_string(), service)]),
        exclude: Vec::new(),
        extra: IndexMap::new(),
    })
}

fn default_size(sizes: &[SizeOption]) -> Option<&SizeOption> {
    sizes.get(SIZE_INDEX_DEFAULT).or_else(|| sizes.last())
}

/// Monthly and hourly price in minor currency units.
pub fn service_cost(size: &SizeOption, data: &DeployData) -> Option<(f64, f64)> {
    if data.base_value <= 0.0 {
        return None;
    }
    let month = size.memory.value / data.base_value * data.base_cost;
    Some((month, month / HOURS_PER_MONTH))
}

/// `"micro (512 MiB RAM, 1 GB SSD): 20 RUB/month, 0.03 RUB/hour"`.
pub fn cost_label(size: &SizeOption, data: &DeployData) -> String {
    let label = format!("{} ({} RAM, {} SSD)", size.name, size.memory.name, size.storage);
    match service_cost(size, data) {
        Some((month, hour)) => format!(
            "{label}: {} {CURRENCY}/month, {} {CURRENCY}/hour",
            round2(month / 100.0),
            round2(hour / 100.0)
        ),
        None => label,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// First free `<kind><n>` key.
pub fn unique_service_name(kind: &str, services: &IndexMap<String, Service>) -> String {
    (0..)
        .map(|i| format!("{kind}{i}"))
        .find(|name| !services.contains_key(name))
        .unwrap_or_else(|| kind.to_string())
}

/// Validate a typed port against the range and the ports already chosen.
pub fn parse_port(input: &str, taken: &[Port]) -> Result<u32, String> {
    let input = input.trim();
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err("Port must be a decimal number".to_string());
    }
    let port = match input.parse::<u32>() {
        Ok(p) if p <= PORT_MAX => p,
        _ => return Err(format!("Port can't be more than {PORT_MAX}")),
    };
    if port == 0 {
        return Err("Port must be greater than 0".to_string());
    }
    if taken.iter().any(|p| p.port == port) {
        return Err("The same port already exists".to_string());
    }
    Ok(port)
}

/// Suggested start command for a custom service kind.
pub fn default_command(kind: &str, project: &str, port: u32, fpm: bool) -> String {
    match kind {
        "node" => NODE_COMMAND.to_string(),
        "rust" => format!("cargo build --release && ./target/release/{project}"),
        "python" => "python main.py".to_string(),
        "golang" => "go run main.go".to_string(),
        "php" if fpm => "php-fpm".to_string(),
        "php" => format!("php -S 0.0.0.0:{port}"),
        "ruby" => "ruby main.rb".to_string(),
        _ => String::new(),
    }
}

async fn ask_project_name(prompter: &Prompter, default: &str) -> Result<String, CliError> {
    loop {
        let name = prompter.input("Setting up the project name", default).await?;
        if PROJECT_NAME.is_match(&name) {
            return Ok(name);
        }
        warn!(
            allowed = PROJECT_NAME.as_str(),
            "Project name contains not allowed symbols"
        );
    }
}

async fn ask_service(
    prompter: &Prompter,
    data: &DeployData,
    config: &ConfigFile,
) -> Result<(String, Service), CliError> {
    if data.services.is_empty() || data.sizes.is_empty() {
        return Err(CliError::Protocol(
            "service catalog is temporarily unavailable".to_string(),
        ));
    }
    let items = data
        .services
        .iter()
        .map(|t| format!("{} ({})", t.kind, t.name))
        .collect();
    let template = &data.services[prompter.select("Select service", items, 0).await?];

    let labels = data.sizes.iter().map(|s| cost_label(s, data)).collect();
    let default = SIZE_INDEX_DEFAULT.min(data.sizes.len() - 1);
    let size = &data.sizes[prompter.select("Select size of service", labels, default).await?];

    let version = ask_version(prompter, template).await?;
    let kind = template.kind.as_str();
    let fpm = kind == "php" && version.contains("fpm");

    let (ports, command) = if CUSTOM_SERVICES.contains(&kind) {
        let ports = ask_ports(prompter, fpm).await?;
        let first = ports.first().map_or(if fpm { PHP_FPM_PORT } else { PORT_DEFAULT }, |p| p.port);
        let command = prompter
            .input(
                "Specify service start command",
                &default_command(kind, &config.project, first, fpm),
            )
            .await?;
        (ports, Some(command))
    } else {
        (Vec::new(), None)
    };

    let environment = ports
        .iter()
        .enumerate()
        .map(|(i, p)| match i {
            0 => format!("PORT={}", p.port),
            i => format!("PORT{i}={}", p.port),
        })
        .collect();
    let service = Service {
        kind: kind.to_string(),
        active: true,
        size: size.name.clone(),
        image: None,
        version: Some(version),
        command,
        ports,
        domains: IndexMap::new(),
        environment: Environment::List(environment),
        extra: IndexMap::new(),
    };
    Ok((unique_service_name(kind, &config.services), service))
}

async fn ask_version(prompter: &Prompter, template: &ServiceTemplate) -> Result<String, CliError> {
    if template.tags.is_empty() {
        let message = format!("Set {} version from {}/tags", template.name, template.images);
        return prompter.input(&message, "latest").await;
    }
    let message = format!("Select {} version", template.name);
    let index = prompter.select(&message, template.tags.clone(), 0).await?;
    Ok(template.tags[index].clone())
}

async fn ask_ports(prompter: &Prompter, fpm: bool) -> Result<Vec<Port>, CliError> {
    let default = (if fpm { PHP_FPM_PORT } else { PORT_DEFAULT }).to_string();
    let mut ports: Vec<Port> = Vec::new();
    loop {
        let message = if ports.is_empty() {
            "Setting up a listening port"
        } else {
            "Setting up another listening port"
        };
        let port = match parse_port(&prompter.input(message, &default).await?, &ports) {
            Ok(port) => port,
            Err(reason) => {
                warn!("{reason}");
                continue;
            }
        };
        let types: Vec<String> = PORT_TYPES.iter().map(|t| t.to_string()).collect();
        let kind = types[prompter.select("Select port type", types.clone(), 0).await?].clone();
        ports.push(Port {
            port,
            kind,
            timeout: None,
        });
        if !prompter
            .confirm("Do you want to add another listened port?", false)
            .await?
        {
            return Ok(ports);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::commands::testing::{drive, settings_in, signed_in};
    use crate::prompt::testing::{Answer, ScriptedPrompt};
    use crate::protocol::connector::testing::{accept_session, recv_json, send_json, ws_pair};
    use crate::protocol::message::Memory;

    fn size(name: &str, value: f64) -> SizeOption {
        SizeOption {
            name: name.into(),
            memory: Memory {
                name: format!("{value} MiB"),
                value,
            },
            cpus: 0.5,
            storage: "1 GB".into(),
        }
    }

    fn catalog() -> DeployData {
        DeployData {
            services: vec![
                ServiceTemplate {
                    kind: "node".into(),
                    name: "Node.js".into(),
                    images: "node".into(),
                    tags: vec!["22-alpine".into(), "20-alpine".into()],
                },
                ServiceTemplate {
                    kind: "redis".into(),
                    name: "Redis".into(),
                    images: "redis".into(),
                    tags: Vec::new(),
                },
            ],
            sizes: vec![
                size("pico", 128.0),
                size("nano", 256.0),
                size("micro", 512.0),
                size("mini", 1024.0),
            ],
            base_value: 256.0,
            base_cost: 1000.0,
        }
    }

    fn catalog_json() -> serde_json::Value {
        json!({
            "services": [
                {"type": "node", "name": "Node.js", "images": "node", "tags": ["22-alpine", "20-alpine"]},
                {"type": "redis", "name": "Redis", "images": "redis", "tags": []}
            ],
            "sizes": [
                {"name": "pico", "memory": {"name": "128 MiB", "value": 128}, "cpus": 0.5, "storage": "1 GB"},
                {"name": "nano", "memory": {"name": "256 MiB", "value": 256}, "cpus": 0.5, "storage": "1 GB"},
                {"name": "micro", "memory": {"name": "512 MiB", "value": 512}, "cpus": 0.5, "storage": "1 GB"},
                {"name": "mini", "memory": {"name": "1024 MiB", "value": 1024}, "cpus": 1, "storage": "2 GB"}
            ],
            "baseValue": 256,
            "baseCost": 1000
        })
    }

    #[test]
    fn default_config_uses_first_node_tag_and_default_size() {
        let config = default_config(&catalog(), "shop").unwrap();
        assert_eq!(config.project, "shop");
        let node = &config.services["node0"];
        assert_eq!(node.kind, "node");
        assert_eq!(node.size, "mini");
        assert_eq!(node.version.as_deref(), Some("22-alpine"));
        assert_eq!(node.command.as_deref(), Some(NODE_COMMAND));
        assert_eq!(node.ports[0].port, 3000);
        assert_eq!(node.environment, Environment::List(vec!["PORT=3000".into()]));
        config.validate().unwrap();

        let mut few = catalog();
        few.sizes.truncate(2);
        few.services.clear();
        let config = default_config(&few, "shop").unwrap();
        assert_eq!(config.services["node0"].size, "nano");
        assert_eq!(config.services["node0"].version.as_deref(), Some("latest"));

        few.sizes.clear();
        assert!(default_config(&few, "shop").is_err());
    }

    #[test]
    fn cost_label_shows_rounded_prices() {
        let data = catalog();
        assert_eq!(
            cost_label(&data.sizes[2], &data),
            "micro (512 MiB RAM, 1 GB SSD): 20 RUB/month, 0.03 RUB/hour"
        );
        let free = DeployData {
            base_value: 0.0,
            ..catalog()
        };
        assert_eq!(cost_label(&free.sizes[0], &free), "pico (128 MiB RAM, 1 GB SSD)");
    }

    #[test]
    fn port_input_rules() {
        let taken = vec![Port {
            port: 8080,
            kind: "http".into(),
            timeout: None,
        }];
        assert_eq!(parse_port("3000", &taken), Ok(3000));
        assert_eq!(parse_port(" 443 ", &taken), Ok(443));
        assert!(parse_port("30a0", &taken).is_err());
        assert!(parse_port("-1", &taken).is_err());
        assert!(parse_port("", &taken).is_err());
        assert!(parse_port("65536", &taken).unwrap_err().contains("65535"));
        assert!(parse_port("99999999999", &taken).is_err());
        assert!(parse_port("0", &taken).is_err());
        assert!(parse_port("8080", &taken).unwrap_err().contains("already"));
    }

    #[test]
    fn service_names_are_unique_per_kind() {
        let config = default_config(&catalog(), "shop").unwrap();
        let mut services = config.services;
        assert_eq!(unique_service_name("node", &services), "node1");
        assert_eq!(unique_service_name("redis", &services), "redis0");
        let node = services["node0"].clone();
        services.insert("node1".into(), node);
        assert_eq!(unique_service_name("node", &services), "node2");
    }

    #[test]
    fn start_command_defaults() {
        assert_eq!(default_command("rust", "shop", 3000, false), "cargo build --release && ./target/release/shop");
        assert_eq!(default_command("php", "shop", 8000, false), "php -S 0.0.0.0:8000");
        assert_eq!(default_command("php", "shop", 9000, true), "php-fpm");
        assert_eq!(default_command("custom", "shop", 3000, false), "");
    }

    #[tokio::test]
    async fn interactive_service_gets_ports_and_command() {
        let prompt = ScriptedPrompt::new([
            Answer::Choice(0),               // node
            Answer::Choice(2),               // micro
            Answer::Choice(1),               // 20-alpine
            Answer::Text("abc".into()),      // rejected port
            Answer::Text("3000".into()),
            Answer::Choice(0),               // http
            Answer::Yes(true),
            Answer::Text("3000".into()),     // duplicate
            Answer::Text("3001".into()),
            Answer::Choice(1),               // ws
            Answer::Yes(false),
            Answer::Text("node index.js".into()),
        ]);
        let prompter = Prompter::new(prompt.clone());
        let config = ConfigFile {
            project: "shop".into(),
            services: IndexMap::new(),
            exclude: Vec::new(),
            extra: IndexMap::new(),
        };

        let (name, service) = ask_service(&prompter, &catalog(), &config).await.unwrap();
        assert_eq!(name, "node0");
        assert_eq!(service.size, "micro");
        assert_eq!(service.version.as_deref(), Some("20-alpine"));
        assert_eq!(service.command.as_deref(), Some("node index.js"));
        let ports: Vec<(u32, &str)> = service.ports.iter().map(|p| (p.port, p.kind.as_str())).collect();
        assert_eq!(ports, vec![(3000, "http"), (3001, "ws")]);
        assert_eq!(
            service.environment,
            Environment::List(vec!["PORT=3000".into(), "PORT1=3001".into()])
        );
        assert_eq!(prompt.asked().len(), 12);
    }

    #[tokio::test]
    async fn catalog_service_without_tags_asks_for_version() {
        let prompt = ScriptedPrompt::new([
            Answer::Choice(1),
            Answer::Choice(0),
            Answer::Text("7.2".into()),
        ]);
        let prompter = Prompter::new(prompt.clone());
        let config = default_config(&catalog(), "shop").unwrap();

        let (name, service) = ask_service(&prompter, &catalog(), &config).await.unwrap();
        assert_eq!(name, "redis0");
        assert_eq!(service.version.as_deref(), Some("7.2"));
        assert!(service.ports.is_empty());
        assert!(service.command.is_none());
        assert_eq!(prompt.asked()[2], "Set Redis version from redis/tags");
    }

    #[tokio::test]
    async fn yes_writes_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let (client, mut server) = ws_pair().await;
        let srv = tokio::spawn(async move {
            accept_session(&mut server, "tok123", "u1").await;
            let req = recv_json(&mut server).await.unwrap();
            assert_eq!(req["type"], "getDeployData");
            send_json(&mut server, json!({"type": "deployDataCli", "data": catalog_json()})).await;
            server
        });

        let mut init = InitCommand::new(&InitArgs { yes: true }, dir.path());
        let outcome = drive(client, signed_in(), settings_in(dir.path()), ScriptedPrompt::default(), &mut init).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome, Outcome::Success);

        let (path, config) = ConfigFile::load(dir.path()).unwrap();
        assert!(path.ends_with("conhos.yaml"));
        assert_eq!(config.services["node0"].size, "mini");
    }

    #[tokio::test]
    async fn existing_config_is_kept_when_overwrite_declined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conhos.yml"), "project: shop\n").unwrap();
        let (client, mut server) = ws_pair().await;
        let srv = tokio::spawn(async move {
            accept_session(&mut server, "tok123", "u1").await;
            server
        });

        let prompt = ScriptedPrompt::new([Answer::Choice(0), Answer::Yes(false)]);
        let mut init = InitCommand::new(&InitArgs::default(), dir.path());
        let outcome = drive(client, signed_in(), settings_in(dir.path()), prompt, &mut init).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("conhos.yml")).unwrap(),
            "project: shop\n"
        );
    }

    #[tokio::test]
    async fn add_new_service_extends_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        default_config(&catalog(), "shop")
            .unwrap()
            .write(&dir.path().join("conhos.yaml"))
            .unwrap();
        let (client, mut server) = ws_pair().await;
        let srv = tokio::spawn(async move {
            accept_session(&mut server, "tok123", "u1").await;
            recv_json(&mut server).await.unwrap();
            send_json(&mut server, json!({"type": "deployData", "data": catalog_json()})).await;
            server
        });

        let prompt = ScriptedPrompt::new([
            Answer::Choice(1), // add new service
            Answer::Choice(1), // redis
            Answer::Choice(0),
            Answer::Text("latest".into()),
            Answer::Yes(false),
        ]);
        let mut init = InitCommand::new(&InitArgs::default(), dir.path());
        let outcome = drive(client, signed_in(), settings_in(dir.path()), prompt, &mut init).await;
        let _server = srv.await.unwrap();
        assert_eq!(outcome, Outcome::Success);

        let (_, config) = ConfigFile::load(dir.path()).unwrap();
        let names: Vec<&str> = config.services.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["node0", "redis0"]);
        assert_eq!(config.project, "shop");
    }
}
