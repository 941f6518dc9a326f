//! Project manifests.
//!
//! A project is a directory containing `image.toml` (the declared package set)
//! and, optionally, `image.lock` (pinned content checksums). Both files are
//! read-only inputs to the pipeline; nothing here mutates the project.
//!
//! # Manifest Format
//!
//! ```toml
//! [project]
//! name = "demo"
//!
//! [packages.Example]
//! version = "0.1.0"
//! source = "lua/Example.lua"
//! deps = ["Base"]
//! ```

mod lock;
mod types;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use lock::{LOCK_VERSION, LockError, LockFile, LockedPackage};
pub use types::{PackageDef, ProjectManifest, ProjectMeta};

use crate::consts::{LOCK_FILENAME, MANIFEST_FILENAME};

/// Errors that can occur when loading a project.
#[derive(Debug, Error)]
pub enum ManifestError {
  /// The manifest file does not exist.
  #[error("manifest not found at '{0}'")]
  NotFound(String),

  /// Failed to read the manifest file.
  #[error("failed to read manifest '{path}': {source}")]
  Read {
    path: String,
    #[source]
    source: io::Error,
  },

  /// The manifest is not valid TOML (or has the wrong shape).
  #[error("failed to parse manifest '{path}': {source}")]
  Parse {
    path: String,
    #[source]
    source: toml::de::Error,
  },

  /// The lock file exists but could not be loaded.
  #[error(transparent)]
  Lock(#[from] LockError),
}

/// A loaded project: the directory plus its parsed manifest pair.
#[derive(Debug, Clone)]
pub struct Project {
  /// Absolute or caller-relative project directory.
  pub dir: PathBuf,
  /// Parsed `image.toml`.
  pub manifest: ProjectManifest,
  /// Parsed `image.lock`, when present.
  pub lock: Option<LockFile>,
}

impl Project {
  /// Load the manifest pair from a project directory.
  pub fn load(dir: &Path) -> Result<Self, ManifestError> {
    let manifest_path = dir.join(MANIFEST_FILENAME);

    let content = match fs::read_to_string(&manifest_path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(ManifestError::NotFound(manifest_path.display().to_string()));
      }
      Err(e) => {
        return Err(ManifestError::Read {
          path: manifest_path.display().to_string(),
          source: e,
        });
      }
    };

    let manifest: ProjectManifest = toml::from_str(&content).map_err(|e| ManifestError::Parse {
      path: manifest_path.display().to_string(),
      source: e,
    })?;

    let lock = LockFile::load(&dir.join(LOCK_FILENAME))?;

    debug!(
      dir = %dir.display(),
      packages = manifest.packages.len(),
      locked = lock.is_some(),
      "loaded project"
    );

    Ok(Self {
      dir: dir.to_path_buf(),
      manifest,
      lock,
    })
  }

  /// Look up a package definition by name.
  pub fn package(&self, name: &str) -> Option<&PackageDef> {
    self.manifest.packages.get(name)
  }

  /// Absolute source path for a package definition.
  pub fn source_path(&self, def: &PackageDef) -> PathBuf {
    self.dir.join(&def.source)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write_project(manifest: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(MANIFEST_FILENAME), manifest).unwrap();
    temp
  }

  #[test]
  fn load_minimal_manifest() {
    let temp = write_project(
      r#"
        [packages.Example]
        version = "0.1.0"
        source = "Example.lua"
      "#,
    );

    let project = Project::load(temp.path()).unwrap();
    assert_eq!(project.manifest.packages.len(), 1);

    let def = project.package("Example").unwrap();
    assert_eq!(def.version.to_string(), "0.1.0");
    assert!(def.deps.is_empty());
    assert!(project.lock.is_none());
  }

  #[test]
  fn load_manifest_with_deps_and_meta() {
    let temp = write_project(
      r#"
        [project]
        name = "demo"

        [packages.App]
        version = "1.2.3"
        source = "lua/app.lua"
        deps = ["Base"]

        [packages.Base]
        version = "0.2.0"
        source = "lua/base.lua"
      "#,
    );

    let project = Project::load(temp.path()).unwrap();
    assert_eq!(project.manifest.project.as_ref().unwrap().name, "demo");
    assert_eq!(project.package("App").unwrap().deps, vec!["Base".to_string()]);
  }

  #[test]
  fn load_missing_manifest_fails() {
    let temp = TempDir::new().unwrap();
    let result = Project::load(temp.path());
    assert!(matches!(result, Err(ManifestError::NotFound(_))));
  }

  #[test]
  fn load_malformed_manifest_fails() {
    let temp = write_project("this is not toml [[[");
    let result = Project::load(temp.path());
    assert!(matches!(result, Err(ManifestError::Parse { .. })));
  }

  #[test]
  fn load_manifest_with_bad_version_fails() {
    let temp = write_project(
      r#"
        [packages.Example]
        version = "not-a-version"
        source = "Example.lua"
      "#,
    );

    let result = Project::load(temp.path());
    assert!(matches!(result, Err(ManifestError::Parse { .. })));
  }

  #[test]
  fn source_path_joins_project_dir() {
    let temp = write_project(
      r#"
        [packages.Example]
        version = "0.1.0"
        source = "lua/Example.lua"
      "#,
    );

    let project = Project::load(temp.path()).unwrap();
    let def = project.package("Example").unwrap();
    assert_eq!(project.source_path(def), temp.path().join("lua/Example.lua"));
  }
}
