//! Hashing utilities for package content identity.
//!
//! This module provides:
//! - `ObjectHash`: a truncated 20-character hash identifying a package revision
//! - `ContentHash`: a full 64-character hash for file verification
//! - `hash_file()` / `hash_bytes()`: content hashing helpers

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A content-addressed hash identifying a unique object.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized struct.
/// This provides sufficient collision resistance while keeping identifiers readable.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string, e.g., `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let full = format!("{:x}", hasher.finalize());
    Ok(ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// A full 64-character SHA256 hash for content verification.
///
/// Unlike `ObjectHash` which is truncated for readability, `ContentHash`
/// provides the full hash for maximum collision resistance when verifying
/// package sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[derive(Serialize)]
  struct Sample {
    name: String,
    version: String,
  }

  impl Hashable for Sample {}

  #[test]
  fn object_hash_is_deterministic() {
    let a = Sample {
      name: "Example".to_string(),
      version: "0.1.0".to_string(),
    };
    let b = Sample {
      name: "Example".to_string(),
      version: "0.1.0".to_string(),
    };

    assert_eq!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
  }

  #[test]
  fn object_hash_changes_with_content() {
    let a = Sample {
      name: "Example".to_string(),
      version: "0.1.0".to_string(),
    };
    let b = Sample {
      name: "Example".to_string(),
      version: "0.2.0".to_string(),
    };

    assert_ne!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
  }

  #[test]
  fn object_hash_is_truncated() {
    let hash = Sample {
      name: "x".to_string(),
      version: "1".to_string(),
    }
    .compute_hash()
    .unwrap();
    assert_eq!(hash.0.len(), OBJ_HASH_PREFIX_LEN);
  }

  #[test]
  fn hash_file_works() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("test.lua");
    fs::write(&file_path, "return {}").unwrap();

    let hash = hash_file(&file_path).unwrap();
    assert_eq!(hash.0.len(), 64);

    // Same content = same hash
    let hash2 = hash_file(&file_path).unwrap();
    assert_eq!(hash, hash2);
  }

  #[test]
  fn hash_bytes_matches_file_hash() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("test.lua");
    fs::write(&file_path, "return 42").unwrap();

    assert_eq!(hash_file(&file_path).unwrap(), hash_bytes(b"return 42"));
  }
}
