//! Deploy archive: the project directory packed into a gzip'd tarball in the
//! temp dir.
//!
//! Packing walks the tree with walkdir, drops excluded paths, and writes the
//! remaining regular files in sorted order. The file is removed when the
//! [`Archive`] is dropped.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::CliError;
use crate::project::CONFIG_FILE_NAMES;

/// Directory names never shipped, at any depth.
pub const ALWAYS_EXCLUDED: [&str; 3] = [".git", ".vscode", "node_modules"];

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// Paths left out of the archive.
#[derive(Debug, Clone, Default)]
pub struct Excludes {
    patterns: Vec<String>,
}

impl Excludes {
    /// Configured patterns are project-relative paths; `./` and trailing `/`
    /// are ignored.
    pub fn new(configured: &[String]) -> Self {
        let patterns = configured
            .iter()
            .map(|p| {
                p.trim()
                    .trim_start_matches("./")
                    .trim_end_matches('/')
                    .to_string()
            })
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    /// `rel` is relative to the project root.
    pub fn is_excluded(&self, rel: &Path) -> bool {
        let names: Vec<&str> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();
        if names.iter().any(|n| ALWAYS_EXCLUDED.contains(n)) {
            return true;
        }
        if let [single] = names.as_slice() {
            if CONFIG_FILE_NAMES.contains(single) {
                return true;
            }
        }
        let joined = names.join("/");
        self.patterns
            .iter()
            .any(|p| joined == *p || joined.starts_with(&format!("{p}/")))
    }
}

/// A packed archive on disk.
#[derive(Debug)]
pub struct Archive {
    pub path: PathBuf,
    pub size: u64,
    pub files: usize,
    /// Lowercase hex SHA-256 of the archive file.
    pub sha256: String,
}

impl Drop for Archive {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Could not remove archive");
        }
    }
}

/// Pack `root` into `<temp>/<project>-<pid>-<uuid>.tgz`.
pub async fn pack(root: &Path, project: &str, excludes: Excludes) -> Result<Archive, CliError> {
    let file_name = format!(
        "{}-{}-{}.tgz",
        project.replace(['/', '\\'], "_"),
        std::process::id(),
        Uuid::new_v4().simple()
    );
    let dest = std::env::temp_dir().join(file_name);
    pack_to(root, &dest, excludes).await
}

pub async fn pack_to(root: &Path, dest: &Path, excludes: Excludes) -> Result<Archive, CliError> {
    let (root_owned, dest_owned) = (root.to_path_buf(), dest.to_path_buf());
    let files = tokio::task::spawn_blocking(move || pack_blocking(&root_owned, &dest_owned, &excludes))
        .await
        .map_err(|e| CliError::Archive(format!("packing task failed: {e}")))??;

    let size = tokio::fs::metadata(dest).await?.len();
    let sha256 = hash_file(dest).await?;
    info!(files, size, sha256 = %sha256, "Archive created");
    Ok(Archive {
        path: dest.to_path_buf(),
        size,
        files,
        sha256,
    })
}

/// Files under `root` that would be packed, relative and sorted.
pub fn collect_files(root: &Path, excludes: &Excludes) -> Result<Vec<PathBuf>, CliError> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(root) {
            Ok(rel) => rel.as_os_str().is_empty() || !excludes.is_excluded(rel),
            Err(_) => true,
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| CliError::Archive(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(rel.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn pack_blocking(root: &Path, dest: &Path, excludes: &Excludes) -> Result<usize, CliError> {
    let files = collect_files(root, excludes)?;
    let archive_err = |e: io::Error| CliError::Archive(format!("{}: {e}", dest.display()));

    let out = File::create(dest).map_err(archive_err)?;
    let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
    for rel in &files {
        builder
            .append_path_with_name(root.join(rel), rel)
            .map_err(|e| CliError::Archive(format!("{}: {e}", rel.display())))?;
    }
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(archive_err)?;
    Ok(files.len())
}

/// SHA-256 of a file, streamed in 64 KiB blocks.
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, rel.as_bytes()).unwrap();
    }

    fn entries(archive: &Path) -> Vec<String> {
        let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        let mut names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn default_exclusions_apply_at_any_depth() {
        let ex = Excludes::default();
        assert!(ex.is_excluded(Path::new("node_modules/x/index.js")));
        assert!(ex.is_excluded(Path::new("web/node_modules/y")));
        assert!(ex.is_excluded(Path::new(".git")));
        assert!(ex.is_excluded(Path::new("conhos.yaml")));
        assert!(!ex.is_excluded(Path::new("sub/conhos.yaml")));
        assert!(!ex.is_excluded(Path::new("src/main.js")));
    }

    #[test]
    fn configured_exclusions_match_path_prefixes() {
        let ex = Excludes::new(&["./dist/".to_string(), "secrets.env".to_string()]);
        assert!(ex.is_excluded(Path::new("dist")));
        assert!(ex.is_excluded(Path::new("dist/app.js")));
        assert!(!ex.is_excluded(Path::new("distro/app.js")));
        assert!(ex.is_excluded(Path::new("secrets.env")));
    }

    #[tokio::test]
    async fn packs_only_included_files() {
        let src = tempfile::tempdir().unwrap();
        touch(src.path(), "a.txt");
        touch(src.path(), "b.txt");
        touch(src.path(), "node_modules/x");
        touch(src.path(), "conhos.yaml");
        touch(src.path(), "build/out.bin");

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("p.tgz");
        let archive = pack_to(src.path(), &dest, Excludes::new(&["build".to_string()]))
            .await
            .unwrap();

        assert_eq!(archive.files, 2);
        assert_eq!(archive.sha256.len(), 64);
        assert_eq!(entries(&dest), vec!["a.txt", "b.txt"]);
        assert_eq!(archive.size, std::fs::metadata(&dest).unwrap().len());

        drop(archive);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn hash_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            hash_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
