//! Command-line surface (clap derive).

use clap::{Args, Parser, Subcommand};

/// Client for the conhos hosting service.
#[derive(Debug, Parser)]
#[command(name = "conhos", version)]
pub struct Cli {
    /// Path to TOML settings file.
    #[arg(long, global = true)]
    pub settings: Option<String>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in through the browser and store the session.
    Login(LoginArgs),
    /// Upload the project and deploy its services.
    Deploy(DeployArgs),
    /// Open a shell in a running service.
    Exec(ExecArgs),
    /// Print service logs.
    Logs(LogsArgs),
    /// Create the project config file.
    Init(InitArgs),
    /// Print the IP address of the project node.
    Ip(IpArgs),
    /// Manage the project.
    Project(ProjectArgs),
    /// Manage a single service.
    Service(ServiceArgs),
    /// Inspect the Docker registry.
    Registry(RegistryArgs),
    /// Remove the project from the cloud.
    Remove,
}

#[derive(Debug, Default, Args)]
pub struct LoginArgs {
    /// Encrypt the stored session token with a password.
    #[arg(short, long)]
    pub crypt: bool,
    /// Delete the stored session and exit.
    #[arg(short, long, conflicts_with = "crypt")]
    pub remove: bool,
}

#[derive(Debug, Default, Args)]
pub struct DeployArgs {
    /// Accept service deletions without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Service name from the config file.
    pub service: String,
    #[arg(short, long)]
    pub project: Option<String>,
    /// Replica number.
    #[arg(short, long, default_value_t = 1)]
    pub repl: u32,
}

#[derive(Debug, Default, Args)]
pub struct LogsArgs {
    /// Service name from the config file.
    pub service: String,
    #[arg(short, long)]
    pub project: Option<String>,
    /// Keep streaming new lines.
    #[arg(short, long)]
    pub follow: bool,
    /// Prefix lines with timestamps.
    #[arg(short, long)]
    pub timestamps: bool,
    /// Clear the service logs (restarts the service).
    #[arg(short, long)]
    pub clear: bool,
    /// Show logs since a timestamp or relative time (e.g. 42m).
    #[arg(long)]
    pub since: Option<String>,
    /// Show logs before a timestamp or relative time.
    #[arg(long)]
    pub until: Option<String>,
    /// Number of lines from the end.
    #[arg(short = 'n', long)]
    pub tail: Option<u32>,
}

#[derive(Debug, Default, Args)]
pub struct InitArgs {
    /// Write a default config without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Default, Args)]
pub struct IpArgs {
    #[arg(short, long)]
    pub project: Option<String>,
}

#[derive(Debug, Default, Args)]
pub struct ProjectArgs {
    /// Delete the project with all its services.
    #[arg(short, long)]
    pub delete: bool,
    /// Ask before deleting each service.
    #[arg(short, long)]
    pub interactive: bool,
    #[arg(short, long)]
    pub project: Option<String>,
}

#[derive(Debug, Default, Args)]
pub struct ServiceArgs {
    /// Service name from the config file.
    #[arg(short, long)]
    pub name: Option<String>,
    /// Restart the service.
    #[arg(short, long)]
    pub restart: bool,
    #[arg(short, long)]
    pub project: Option<String>,
}

#[derive(Debug, Default, Args)]
pub struct RegistryArgs {
    /// List repositories.
    #[arg(short, long)]
    pub list: bool,
}
