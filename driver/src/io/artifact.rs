//! Writes the generated entry-point program into the project directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Owns the single entry-point file of a project (e.g. `main.py`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    entry_file: String,
}

impl ArtifactStore {
    /// `entry_file` is a bare file name; path separators are rejected.
    pub fn new(entry_file: impl Into<String>) -> Result<Self> {
        let entry_file = entry_file.into();
        if entry_file.trim().is_empty() {
            bail!("entry file name must not be empty");
        }
        if Path::new(&entry_file).components().count() != 1
            || entry_file.contains(['/', '\\'])
            || entry_file == "."
            || entry_file == ".."
        {
            bail!("entry file must be a bare file name, got {entry_file:?}");
        }
        Ok(Self { entry_file })
    }

    pub fn entry_file(&self) -> &str {
        &self.entry_file
    }

    pub fn artifact_path(&self, project_path: &Path) -> PathBuf {
        project_path.join(&self.entry_file)
    }

    /// Create `project_path` if needed and replace the entry file with `content`.
    ///
    /// The content lands in a sibling temp file first and is renamed over the
    /// entry file, so a reader never observes a partially written program.
    pub fn write(&self, project_path: &Path, content: &str) -> Result<PathBuf> {
        fs::create_dir_all(project_path).with_context(|| {
            format!("create project directory {}", project_path.display())
        })?;
        let path = self.artifact_path(project_path);
        let tmp_path = project_path.join(format!(".{}.tmp", self.entry_file));
        fs::write(&tmp_path, content)
            .with_context(|| format!("write temp artifact {}", tmp_path.display()))?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err).with_context(|| format!("replace artifact {}", path.display()));
        }
        debug!(path = %path.display(), bytes = content.len(), "artifact written");
        Ok(path)
    }
}
