#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! conhos library: the session/protocol engine behind the `conhos` binary.
//!
//! - `protocol`: message envelope, tagged message kinds, connector state machine
//! - `session`: encrypted session persistence and the pre-connect auth gate
//! - `archive` / `upload`: project tarball and chunked deploy stream
//! - `terminal`: interactive bridge for `exec`
//! - `commands`: one handler per subcommand, plus the top-level runner

pub mod archive;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod progress;
pub mod project;
pub mod prompt;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod terminal;
pub mod upload;
pub mod util;

pub use config::Settings;
pub use error::{CliError, Outcome};
pub use prompt::Prompter;

/// Package name announced in every envelope.
pub const PACKAGE_NAME: &str = "conhos";
