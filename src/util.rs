//! Small helpers shared across modules.

use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CliError;

/// Expand a leading `~` to `$HOME`.
///
/// - `"~"` → `"/home/user"`
/// - `"~/foo"` → `"/home/user/foo"`
/// - Anything else passes through unchanged.
pub fn expand_tilde(path: &str) -> Cow<'_, str> {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            if path == "~" {
                return Cow::Owned(home);
            }
            return Cow::Owned(format!("{}{}", home, &path[1..]));
        }
    }
    Cow::Borrowed(path)
}

/// Turn an `http(s)://` service address into the matching `ws(s)://` URL.
/// `ws://` and `wss://` pass through.
pub fn build_ws_url(base_url: &str) -> Result<String, CliError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        Ok(base.to_string())
    } else {
        Err(CliError::Config(format!("invalid URL scheme: {base}")))
    }
}

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z0-9_]+)").expect("Invalid variable regex")
});

/// Replace every `${NAME}` and `$NAME` with `lookup(NAME)`.
///
/// Undefined or empty names are left as written and returned so the caller
/// can warn about them.
pub fn substitute_vars(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> (String, Vec<String>) {
    let mut missing = Vec::new();
    let out = VAR_PATTERN.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        match lookup(name).filter(|v| !v.is_empty()) {
            Some(value) => value,
            None => {
                missing.push(name.to_string());
                caps[0].to_string()
            }
        }
    });
    (out.into_owned(), missing)
}

/// Cut `text` to fit `columns`, marking the cut with `" ..."`.
pub fn truncate_to_width(text: &str, columns: usize) -> Cow<'_, str> {
    const ELLIPSIS: &str = " ...";
    if text.chars().count() <= columns {
        return Cow::Borrowed(text);
    }
    let keep = columns.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    Cow::Owned(out)
}

static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `path` through a temp file in the same directory and a rename,
/// so readers never see a partial file. On Unix the file is created `mode`.
pub async fn write_atomic(path: &Path, bytes: &[u8], mode: Option<u32>) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;
    let seq = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path = parent.join(format!(".conhos_tmp_{}_{}", std::process::id(), seq));

    tokio::fs::write(&temp_path, bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = mode {
            let perms = std::fs::Permissions::from_mode(mode);
            if let Err(e) = tokio::fs::set_permissions(&temp_path, perms).await {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}
