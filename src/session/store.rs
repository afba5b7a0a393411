//! On-disk session record.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::crypto::Sealed;
use crate::error::CliError;
use crate::util::write_atomic;

/// `{iv, content, uid}` as stored in the session file.
///
/// An empty `iv` means `content` is the plaintext bearer token; otherwise
/// `content` is hex ciphertext that needs the user's password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub iv: String,
    pub content: String,
    pub uid: String,
}

impl SessionRecord {
    pub fn plain(token: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            iv: String::new(),
            content: token.into(),
            uid: uid.into(),
        }
    }

    pub fn sealed(sealed: Sealed, uid: impl Into<String>) -> Self {
        Self {
            iv: sealed.iv,
            content: sealed.content,
            uid: uid.into(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        !self.iv.is_empty()
    }

    pub fn to_sealed(&self) -> Sealed {
        Sealed {
            iv: self.iv.clone(),
            content: self.content.clone(),
        }
    }
}

/// Reads and writes the session file at a fixed path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no session exists. A file that does not parse is treated
    /// the same way, with a warning.
    pub async fn read(&self) -> Result<Option<SessionRecord>, CliError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Session file is damaged, ignoring it");
                Ok(None)
            }
        }
    }

    /// Replace the session file. Owner-only permissions on Unix.
    pub async fn write(&self, record: &SessionRecord) -> Result<(), CliError> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| CliError::Io(io::Error::other(e)))?;
        write_atomic(&self.path, &bytes, Some(0o600)).await?;
        debug!(path = %self.path.display(), encrypted = record.is_encrypted(), "Session saved");
        Ok(())
    }

    /// Delete the session file. Returns whether one existed.
    pub async fn remove(&self) -> Result<bool, CliError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(dir.path().join(".conhos").join("auth"))
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store_in(&dir).read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_then_read_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let record = SessionRecord::plain("tok123", "u1");
        store.write(&record).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(record));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"iv": "", "content": "tok123", "uid": "u1"}));

        assert!(store.remove().await.unwrap());
        assert!(!store.remove().await.unwrap());
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn session_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write(&SessionRecord::plain("t", "u")).await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn damaged_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{not json").unwrap();
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[test]
    fn empty_iv_means_plaintext() {
        assert!(!SessionRecord::plain("tok", "u").is_encrypted());
        let sealed = Sealed {
            iv: "00".repeat(16),
            content: "ab".into(),
        };
        assert!(SessionRecord::sealed(sealed, "u").is_encrypted());
    }
}
