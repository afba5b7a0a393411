//! Session persistence and the pre-connect authentication gate.
//!
//! ```text
//! crypto.rs key derivation, AES-256-CBC encrypt/decrypt
//! store.rs  SessionRecord JSON file, atomic rewrite, removal
//! ```
//!
//! [`resolve_session`] runs before any network I/O: it reads the stored
//! record and, for encrypted records, asks for the password. [`gate`] then
//! decides whether the command may connect at all.

pub mod crypto;
pub mod store;

use tracing::warn;

use crate::error::Outcome;
use crate::prompt::Prompter;
pub use store::{SessionRecord, SessionStore};

/// Password attempts before an encrypted session counts as locked.
pub const PASSWORD_ATTEMPTS: u32 = 3;

/// What the local session file yields before connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// A bearer token ready to be verified by the server.
    Token { token: String, uid: String },
    /// No session file.
    Missing,
    /// Encrypted session whose password was not supplied correctly.
    Locked { uid: String },
}

impl SessionState {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Token { token, .. } => Some(token),
            Self::Missing | Self::Locked { .. } => None,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            Self::Token { uid, .. } | Self::Locked { uid } => uid,
            Self::Missing => "",
        }
    }
}

/// Read the session file and recover the token.
///
/// A plaintext record is used as-is with no prompt. An encrypted record asks
/// for the password up to [`PASSWORD_ATTEMPTS`] times.
pub async fn resolve_session(
    store: &SessionStore,
    prompter: &Prompter,
) -> Result<SessionState, crate::error::CliError> {
    let Some(record) = store.read().await? else {
        return Ok(SessionState::Missing);
    };
    if !record.is_encrypted() {
        return Ok(SessionState::Token {
            token: record.content,
            uid: record.uid,
        });
    }

    let sealed = record.to_sealed();
    for attempt in 1..=PASSWORD_ATTEMPTS {
        let password = prompter.password("Enter password").await?;
        let key = crypto::create_key_blocking(password).await?;
        if let Some(token) = crypto::decrypt(&sealed, &key) {
            return Ok(SessionState::Token {
                token,
                uid: record.uid,
            });
        }
        warn!(attempt, max = PASSWORD_ATTEMPTS, "Password is wrong");
    }
    Ok(SessionState::Locked { uid: record.uid })
}

/// Refuse to connect when the command cannot run the login flow and there
/// is no usable token.
pub fn gate(state: &SessionState, allows_login: bool) -> Result<(), Outcome> {
    if allows_login {
        return Ok(());
    }
    match state {
        SessionState::Token { .. } => Ok(()),
        SessionState::Missing => Err(Outcome::fatal(
            "You are not authenticated, run `conhos login` first",
        )),
        SessionState::Locked { .. } => Err(Outcome::fatal(
            "Session password is wrong, run `conhos login` to start a new session",
        )),
    }
}
