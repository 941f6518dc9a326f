//! Lock file management.
//!
//! The lock file (`image.lock`) pins the content identity of each declared
//! package so that rebuilding from the same manifest pair yields the same
//! package identifiers. It is stored next to the manifest.
//!
//! # Lock File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "packages": {
//!     "Example": {
//!       "version": "0.1.0",
//!       "checksum": "a1b2c3d4e5f6789012ab"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::ObjectHash;

/// Current lock file format version.
pub const LOCK_VERSION: u32 = 1;

/// A lock file containing pinned package identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
  /// Lock file format version.
  pub version: u32,
  /// Locked packages, keyed by package name.
  pub packages: BTreeMap<String, LockedPackage>,
}

/// A locked package entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedPackage {
  /// Version the checksum was computed for.
  pub version: Version,

  /// Pinned content identity (truncated object hash).
  pub checksum: ObjectHash,
}

/// Errors that can occur when working with lock files.
#[derive(Debug, Error)]
pub enum LockError {
  /// Failed to read the lock file.
  #[error("failed to read lock file: {0}")]
  Read(#[source] io::Error),

  /// Failed to write the lock file.
  #[error("failed to write lock file: {0}")]
  Write(#[source] io::Error),

  /// Failed to parse the lock file JSON.
  #[error("failed to parse lock file: {0}")]
  Parse(#[source] serde_json::Error),

  /// Failed to serialize the lock file.
  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  /// Lock file version is not supported.
  #[error("unsupported lock file version {0}, expected {LOCK_VERSION}")]
  UnsupportedVersion(u32),
}

impl Default for LockFile {
  fn default() -> Self {
    Self::new()
  }
}

impl LockFile {
  /// Create a new empty lock file.
  pub fn new() -> Self {
    Self {
      version: LOCK_VERSION,
      packages: BTreeMap::new(),
    }
  }

  /// Load a lock file from the given path.
  ///
  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load(path: &Path) -> Result<Option<Self>, LockError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(LockError::Read(e)),
    };

    let lock: LockFile = serde_json::from_str(&content).map_err(LockError::Parse)?;

    if lock.version != LOCK_VERSION {
      return Err(LockError::UnsupportedVersion(lock.version));
    }

    Ok(Some(lock))
  }

  /// Save the lock file to the given path.
  pub fn save(&self, path: &Path) -> Result<(), LockError> {
    let content = serde_json::to_string_pretty(self).map_err(LockError::Serialize)?;
    fs::write(path, content).map_err(LockError::Write)?;
    Ok(())
  }

  /// Get a locked package by name.
  pub fn get(&self, name: &str) -> Option<&LockedPackage> {
    self.packages.get(name)
  }

  /// Insert or update a locked package.
  pub fn insert(&mut self, name: String, package: LockedPackage) {
    self.packages.insert(name, package);
  }
}
