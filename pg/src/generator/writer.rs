//! Writing generated files under a project root

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors from writing a generated file
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Refusing to write outside the project root: {0}")]
    OutsideRoot(String),

    #[error("File already exists (use --overwrite to replace): {}", .0.display())]
    Exists(PathBuf),

    #[error("I/O error writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes files beneath one root directory
#[derive(Debug, Clone)]
pub struct ProjectWriter {
    root: PathBuf,
    overwrite: bool,
}

impl ProjectWriter {
    pub fn new(root: impl Into<PathBuf>, overwrite: bool) -> Self {
        let root = root.into();
        debug!(root = %root.display(), overwrite, "ProjectWriter::new: called");
        Self { root, overwrite }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path under the root, rejecting anything that escapes it
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, WriteError> {
        let rel = Path::new(relative);
        let only_normal = rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || !only_normal {
            return Err(WriteError::OutsideRoot(relative.to_string()));
        }
        Ok(self.root.join(rel))
    }

    /// Write `content` to `relative`, creating parent directories
    pub fn write(&self, relative: &str, content: &str) -> Result<PathBuf, WriteError> {
        let path = self.resolve(relative)?;
        debug!(path = %path.display(), bytes = content.len(), "write: called");

        if path.exists() && !self.overwrite {
            return Err(WriteError::Exists(path));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| WriteError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&path, content).map_err(|source| WriteError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Turn a project name or idea into a directory name
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_end_matches('-').chars().take(48).collect();
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() { "project".to_string() } else { slug }
}
