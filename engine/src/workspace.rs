//! Per-task workspace directories
//!
//! Each task gets `<root>/<task_id>/`. Abilities only ever touch files
//! through [`TaskWorkspace::resolve`], which keeps relative paths inside the
//! task directory and refuses credential-looking names.

use sdk::errors::EngineError;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Path components that are never served, wherever they appear
const DENY_LIST: &[&str] = &[
    ".ssh",
    ".env",
    ".aws",
    ".gnupg",
    ".kube",
    ".npmrc",
    ".pypirc",
    "id_rsa",
    "id_ed25519",
    "id_dsa",
    "credentials",
    "private_key",
];

/// Files with this extension stay behind when a task is archived
const ARCHIVE_SKIP_EXTENSION: &str = "sqlite3";

#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    root: PathBuf,
}

impl TaskWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    pub fn archive_dir(&self, task_id: &str) -> PathBuf {
        self.root.join("archive").join(task_id)
    }

    /// Create the task directory if needed
    pub async fn ensure(&self, task_id: &str) -> Result<PathBuf, EngineError> {
        let dir = self.task_dir(task_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Map a model-supplied relative path into the task directory.
    ///
    /// # Errors
    /// `PathOutsideWorkspace` for absolute paths, `..` components or symlinks
    /// leading out; `PathDenied` for deny-listed components.
    pub fn resolve(&self, task_id: &str, relative: &str) -> Result<PathBuf, EngineError> {
        let relative_path = Path::new(relative);
        let task_dir = self.task_dir(task_id);

        for component in relative_path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_string_lossy();
                    if DENY_LIST.iter().any(|denied| part == *denied) {
                        return Err(EngineError::PathDenied(relative_path.to_path_buf()));
                    }
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(EngineError::PathOutsideWorkspace(
                        relative_path.to_path_buf(),
                    ));
                }
            }
        }

        let resolved = task_dir.join(relative_path);

        // Existing paths may be symlinks; check where they really point.
        if resolved.exists() {
            let canonical = resolved.canonicalize()?;
            let canonical_root = task_dir.canonicalize()?;
            if !canonical.starts_with(&canonical_root) {
                return Err(EngineError::PathOutsideWorkspace(
                    relative_path.to_path_buf(),
                ));
            }
        }

        Ok(resolved)
    }

    /// Copy the task's top-level files into `<root>/archive/<task_id>/`.
    ///
    /// Database files (`*.sqlite3`) are skipped. Returns the copied paths.
    pub async fn archive(&self, task_id: &str) -> Result<Vec<PathBuf>, EngineError> {
        let source = self.task_dir(task_id);
        let target = self.archive_dir(task_id);
        fs::create_dir_all(&target).await?;

        let mut copied = Vec::new();
        if !source.is_dir() {
            return Ok(copied);
        }

        let mut entries = fs::read_dir(&source).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some(ARCHIVE_SKIP_EXTENSION) {
                debug!("Skipping {} during archive", path.display());
                continue;
            }

            let dest = target.join(entry.file_name());
            fs::copy(&path, &dest).await?;
            copied.push(dest);
        }

        info!(
            "Archived {} file(s) for task {} to {}",
            copied.len(),
            task_id,
            target.display()
        );
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, TaskWorkspace) {
        let temp = TempDir::new().unwrap();
        let workspace = TaskWorkspace::new(temp.path());
        workspace.ensure("t1").await.unwrap();
        (temp, workspace)
    }

    #[tokio::test]
    async fn test_resolve_inside_task_dir() {
        let (temp, workspace) = setup().await;
        let path = workspace.resolve("t1", "notes/out.txt").unwrap();
        assert_eq!(path, temp.path().join("t1").join("notes/out.txt"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_escapes() {
        let (_temp, workspace) = setup().await;
        assert!(matches!(
            workspace.resolve("t1", "../t2/secret.txt"),
            Err(EngineError::PathOutsideWorkspace(_))
        ));
        assert!(matches!(
            workspace.resolve("t1", "/etc/passwd"),
            Err(EngineError::PathOutsideWorkspace(_))
        ));
        assert!(matches!(
            workspace.resolve("t1", "keys/.ssh/id_rsa"),
            Err(EngineError::PathDenied(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_symlink_out() {
        let (temp, workspace) = setup().await;
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, "x").unwrap();
        std::os::unix::fs::symlink(&outside, temp.path().join("t1").join("link.txt")).unwrap();

        assert!(matches!(
            workspace.resolve("t1", "link.txt"),
            Err(EngineError::PathOutsideWorkspace(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_skips_sqlite() {
        let (temp, workspace) = setup().await;
        let dir = temp.path().join("t1");
        std::fs::write(dir.join("output.txt"), "result").unwrap();
        std::fs::write(dir.join("agent.sqlite3"), "db").unwrap();
        std::fs::create_dir(dir.join("nested")).unwrap();

        let copied = workspace.archive("t1").await.unwrap();

        assert_eq!(copied.len(), 1);
        let archive = workspace.archive_dir("t1");
        assert_eq!(
            std::fs::read_to_string(archive.join("output.txt")).unwrap(),
            "result"
        );
        assert!(!archive.join("agent.sqlite3").exists());
    }
}
