//! Image artifacts.
//!
//! An image artifact is a gzipped tar archive with the following layout:
//!
//! ```text
//! <stem>.img
//! ├── index.json          # ImageIndex: format version, packages, specializations
//! └── chunks/<name>.luac  # dumped bytecode, one chunk per package
//! <stem>.data             # companion constants (JSON), only when registered
//! ```
//!
//! Packages are listed in load order in the index; a loader executes chunks in
//! exactly that order so dependencies are in place before dependents run.
//! Artifacts are immutable once written: the linker stages to a temporary file
//! and renames it into place, so a reader never observes a partial archive.

pub mod link;
pub mod load;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DATA_EXT;
use crate::resolve::PackageId;
use crate::statement::Statement;
use crate::util::hash::ObjectHash;

pub use link::{ImageArtifact, LinkError, link};
pub use load::{LoadError, LoadedImage, load_image};

/// Current image format version.
pub const IMAGE_FORMAT_VERSION: u32 = 1;

/// Archive path of the index.
pub const INDEX_PATH: &str = "index.json";

/// Archive directory holding package chunks.
pub const CHUNKS_DIR: &str = "chunks";

/// The serialized image index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageIndex {
  /// Image format version.
  pub version: u32,
  /// Baked packages, in load order.
  pub packages: Vec<PackageEntry>,
  /// Call specializations forced during the build.
  pub specializations: Vec<Statement>,
  /// Whether a companion data file accompanies the archive.
  pub has_constants: bool,
}

/// One baked package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
  pub name: String,
  pub version: Version,
  pub checksum: ObjectHash,
}

impl PackageEntry {
  pub fn id(&self) -> PackageId {
    PackageId {
      name: self.name.clone(),
      version: self.version.clone(),
      hash: self.checksum.clone(),
    }
  }
}

/// Errors reading an image artifact.
#[derive(Debug, Error)]
pub enum ImageError {
  /// The artifact (or its companion) could not be read.
  #[error("failed to read image '{path}': {source}")]
  Read {
    path: String,
    #[source]
    source: io::Error,
  },

  /// The index (or companion data) is not valid JSON.
  #[error("failed to parse image '{path}': {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  /// The archive is structurally broken.
  #[error("malformed image '{path}': {message}")]
  Malformed { path: String, message: String },

  /// Image format version is not supported.
  #[error("unsupported image format version {0}, expected {IMAGE_FORMAT_VERSION}")]
  UnsupportedVersion(u32),
}

/// An image artifact read fully into memory.
#[derive(Debug, Clone)]
pub struct ImageFile {
  pub index: ImageIndex,
  /// Chunk bytecode, keyed by package name.
  pub chunks: BTreeMap<String, Vec<u8>>,
  /// Constants from the companion data file (empty when none exists).
  pub constants: BTreeMap<String, serde_json::Value>,
}

/// Companion data path for an artifact path (`foo.img` → `foo.data`).
pub fn data_path_for(path: &Path) -> PathBuf {
  path.with_extension(DATA_EXT)
}

impl ImageFile {
  /// Read an artifact (and its companion data file, when the index announces
  /// one) from disk.
  pub fn read(path: &Path) -> Result<Self, ImageError> {
    let read_err = |source| ImageError::Read {
      path: path.display().to_string(),
      source,
    };
    let malformed = |message: &str| ImageError::Malformed {
      path: path.display().to_string(),
      message: message.to_string(),
    };

    let file = fs::File::open(path).map_err(read_err)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut index: Option<ImageIndex> = None;
    let mut chunks = BTreeMap::new();

    for entry in archive.entries().map_err(read_err)? {
      let mut entry = entry.map_err(read_err)?;
      let entry_path = entry.path().map_err(read_err)?.into_owned();

      if entry_path == Path::new(INDEX_PATH) {
        let mut content = String::new();
        entry.read_to_string(&mut content).map_err(read_err)?;
        let parsed: ImageIndex = serde_json::from_str(&content).map_err(|e| ImageError::Parse {
          path: path.display().to_string(),
          source: e,
        })?;
        index = Some(parsed);
      } else if let Ok(rest) = entry_path.strip_prefix(CHUNKS_DIR) {
        let name = rest
          .file_stem()
          .and_then(|s| s.to_str())
          .ok_or_else(|| malformed("chunk entry with unreadable name"))?
          .to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(read_err)?;
        chunks.insert(name, bytes);
      }
    }

    let index = index.ok_or_else(|| malformed("missing index.json"))?;

    if index.version != IMAGE_FORMAT_VERSION {
      return Err(ImageError::UnsupportedVersion(index.version));
    }

    for entry in &index.packages {
      if !chunks.contains_key(&entry.name) {
        return Err(malformed(&format!("missing chunk for package '{}'", entry.name)));
      }
    }

    let constants = if index.has_constants {
      let data_path = data_path_for(path);
      let content = fs::read_to_string(&data_path).map_err(|e| ImageError::Read {
        path: data_path.display().to_string(),
        source: e,
      })?;
      serde_json::from_str(&content).map_err(|e| ImageError::Parse {
        path: data_path.display().to_string(),
        source: e,
      })?
    } else {
      BTreeMap::new()
    };

    Ok(Self {
      index,
      chunks,
      constants,
    })
  }

  /// Names of baked packages, in load order.
  pub fn package_names(&self) -> impl Iterator<Item = &str> {
    self.index.packages.iter().map(|p| p.name.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn data_path_swaps_extension() {
    assert_eq!(data_path_for(Path::new("/x/Example.img")), Path::new("/x/Example.data"));
    assert_eq!(
      data_path_for(Path::new("default.backup.img")),
      Path::new("default.backup.data")
    );
  }

  #[test]
  fn read_missing_artifact_fails() {
    let temp = TempDir::new().unwrap();
    let result = ImageFile::read(&temp.path().join("missing.img"));
    assert!(matches!(result, Err(ImageError::Read { .. })));
  }

  #[test]
  fn read_garbage_artifact_fails() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("garbage.img");
    fs::write(&path, "definitely not a tarball").unwrap();

    let result = ImageFile::read(&path);
    assert!(result.is_err());
  }
}
