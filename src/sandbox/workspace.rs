//! Ephemeral per-request directory
//!
//! Mounted read-only into the isolation unit. Deleted when dropped, so every
//! exit path of `execute()` reclaims it.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

/// World-readable so the unprivileged sandbox user can read it
const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("codeguard-").tempdir()?;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(DIR_MODE))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file directly under the workspace root
    pub async fn write_file(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid workspace file name: {:?}", name),
            ));
        }

        let path = self.dir.path().join(name);
        fs::write(&path, contents).await?;
        fs::set_permissions(&path, std::fs::Permissions::from_mode(FILE_MODE)).await?;
        Ok(path)
    }

    /// Delete now, reporting errors instead of ignoring them on drop
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_cleanup() {
        let workspace = Workspace::create().unwrap();
        let root = workspace.path().to_path_buf();
        assert!(root
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("codeguard-"));

        let path = workspace.write_file("solution.py", "print(1)\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print(1)\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, FILE_MODE);

        workspace.close().unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_dropped_workspace_is_removed() {
        let root = {
            let workspace = Workspace::create().unwrap();
            workspace.write_file("a.txt", "x").await.unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let workspace = Workspace::create().unwrap();
        for name in ["../escape.py", "nested/file.py", "..", ""] {
            let err = workspace.write_file(name, "x").await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }
}
