//! Interactive prompts.
//!
//! [`Prompt`] is the blocking interface; [`TermPrompt`] implements it with
//! dialoguer. [`Prompter`] wraps any implementation and runs each question on
//! the blocking pool so the event loop keeps servicing the connection.

use std::io;
use std::sync::Arc;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};

use crate::error::CliError;

pub trait Prompt: Send + Sync {
    fn password(&self, message: &str) -> io::Result<String>;
    /// New password, asked twice.
    fn new_password(&self, message: &str) -> io::Result<String>;
    fn confirm(&self, message: &str, default: bool) -> io::Result<bool>;
    fn select(&self, message: &str, items: &[String], default: usize) -> io::Result<usize>;
    fn input(&self, message: &str, default: &str) -> io::Result<String>;
}

/// Terminal prompts on stderr.
pub struct TermPrompt;

fn to_io(e: dialoguer::Error) -> io::Error {
    io::Error::other(e.to_string())
}

impl Prompt for TermPrompt {
    fn password(&self, message: &str) -> io::Result<String> {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .interact()
            .map_err(to_io)
    }

    fn new_password(&self, message: &str) -> io::Result<String> {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .with_confirmation("Repeat password", "Passwords do not match")
            .interact()
            .map_err(to_io)
    }

    fn confirm(&self, message: &str, default: bool) -> io::Result<bool> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .default(default)
            .interact()
            .map_err(to_io)
    }

    fn select(&self, message: &str, items: &[String], default: usize) -> io::Result<usize> {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .items(items)
            .default(default)
            .interact()
            .map_err(to_io)
    }

    fn input(&self, message: &str, default: &str) -> io::Result<String> {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .default(default.to_string())
            .interact_text()
            .map_err(to_io)
    }
}

/// Async front-end over a shared [`Prompt`].
#[derive(Clone)]
pub struct Prompter {
    inner: Arc<dyn Prompt>,
}

impl Prompter {
    pub fn new(prompt: impl Prompt + 'static) -> Self {
        Self {
            inner: Arc::new(prompt),
        }
    }

    pub fn terminal() -> Self {
        Self::new(TermPrompt)
    }

    async fn run<T, F>(&self, ask: F) -> Result<T, CliError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Prompt) -> io::Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let answer = tokio::task::spawn_blocking(move || ask(inner.as_ref()))
            .await
            .map_err(io::Error::other)?;
        Ok(answer?)
    }

    pub async fn password(&self, message: &str) -> Result<String, CliError> {
        let message = message.to_string();
        self.run(move |p| p.password(&message)).await
    }

    pub async fn new_password(&self, message: &str) -> Result<String, CliError> {
        let message = message.to_string();
        self.run(move |p| p.new_password(&message)).await
    }

    pub async fn confirm(&self, message: &str, default: bool) -> Result<bool, CliError> {
        let message = message.to_string();
        self.run(move |p| p.confirm(&message, default)).await
    }

    pub async fn select(
        &self,
        message: &str,
        items: Vec<String>,
        default: usize,
    ) -> Result<usize, CliError> {
        let message = message.to_string();
        self.run(move |p| p.select(&message, &items, default)).await
    }

    pub async fn input(&self, message: &str, default: &str) -> Result<String, CliError> {
        let message = message.to_string();
        let default = default.to_string();
        self.run(move |p| p.input(&message, &default)).await
    }
}
