//! Manifest types.
//!
//! Uses [`BTreeMap`] for the package table so serialization order is
//! deterministic, which keeps package identity hashes reproducible.

use std::collections::BTreeMap;
use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

/// The parsed `image.toml` manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectManifest {
  /// Optional project metadata.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project: Option<ProjectMeta>,

  /// Declared packages, keyed by name.
  #[serde(default)]
  pub packages: BTreeMap<String, PackageDef>,
}

/// The `[project]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMeta {
  pub name: String,
}

/// A single `[packages.<name>]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDef {
  /// Declared package version.
  pub version: Version,

  /// Package source file, relative to the project directory.
  pub source: PathBuf,

  /// Names of packages this one depends on (must be loaded first).
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub deps: Vec<String>,
}
