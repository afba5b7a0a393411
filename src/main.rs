#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! # conhos
//!
//! Command-line client for the conhos hosting service.
//!
//! Every command except `registry` and `login --remove` opens one WebSocket
//! connection, authenticates with the stored session and then hands the
//! connection to the command's handler until the server signals the end.
//!
//! ## Subcommands
//!
//! | Command    | What it does                                         |
//! |------------|------------------------------------------------------|
//! | `login`    | Browser sign-in; stores the session and Docker auth  |
//! | `init`     | Builds `conhos.yaml` from the service catalog        |
//! | `deploy`   | Packs and uploads the project, follows the deploy    |
//! | `logs`     | Prints (or follows) service logs                     |
//! | `exec`     | Interactive shell in a running service               |
//! | `ip`       | Prints the project node address                      |
//! | `project`  | Deletes the project                                  |
//! | `service`  | Restarts one service                                 |
//! | `registry` | Lists Docker registry repositories                   |
//! | `remove`   | Removes the configured project from the cloud        |
//!
//! ## Exit codes
//!
//! `0` success, `1` authentication/transport failure or server error,
//! `2` configuration or usage error, `130` interrupted.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use conhos::cli::{Cli, Command};
use conhos::commands;
use conhos::{Outcome, Prompter, Settings};

const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("conhos: {e}");
            std::process::exit(e.exit_code());
        }
    };

    // Initialize tracing
    let log_filter = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| settings.logging.level.clone())
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            error!(error = %e, "Cannot read the working directory");
            std::process::exit(conhos::error::EXIT_FAILURE);
        }
    };

    // Leaving the terminal with an interrupt is a normal way to end `exec`.
    let interrupt_ends_cleanly = matches!(cli.command, Command::Exec(_));

    let outcome = tokio::select! {
        outcome = commands::run(cli.command, settings, Prompter::terminal(), &cwd) => outcome,
        () = shutdown_signal() => {
            if interrupt_ends_cleanly {
                Outcome::Success
            } else {
                Outcome::failure(EXIT_INTERRUPTED, "interrupted")
            }
        }
    };

    if let Outcome::Failure { reason, .. } = &outcome {
        error!("{reason}");
    }
    std::process::exit(outcome.code());
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
