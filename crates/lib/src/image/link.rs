//! Image linking.
//!
//! Linking turns a finished session state into an artifact on disk. The
//! archive is assembled in a temporary file next to the target and renamed
//! into place, so the target path either holds the previous artifact or the
//! complete new one, never a torn write. The companion data file follows the
//! same discipline.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

use crate::image::{CHUNKS_DIR, IMAGE_FORMAT_VERSION, INDEX_PATH, ImageIndex, PackageEntry, data_path_for};
use crate::session::SessionState;

/// A freshly linked artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArtifact {
  /// Path of the archive.
  pub path: PathBuf,
  /// Path of the companion data file, when constants were registered.
  pub data_path: Option<PathBuf>,
}

/// Errors during linking.
#[derive(Debug, Error)]
pub enum LinkError {
  /// The session state holds no packages at all.
  #[error("refusing to link an empty image")]
  Empty,

  /// Index or constants could not be serialized.
  #[error("failed to serialize image metadata: {0}")]
  Serialize(#[from] serde_json::Error),

  /// Staging the archive failed.
  #[error("failed to write image '{path}': {source}")]
  Write {
    path: String,
    #[source]
    source: io::Error,
  },

  /// The staged file could not be moved into place.
  #[error("failed to publish image '{path}': {message}")]
  Publish { path: String, message: String },
}

/// Link a session state into an artifact at `output`.
///
/// With `incremental` set, packages inherited from the base image are baked
/// into the new artifact alongside the freshly loaded ones. Without it, only
/// the packages loaded in this session are kept.
pub fn link(state: &SessionState, output: &Path, incremental: bool) -> Result<ImageArtifact, LinkError> {
  let packages: Vec<_> = state
    .packages
    .iter()
    .filter(|p| incremental || !p.from_base)
    .collect();
  if packages.is_empty() {
    return Err(LinkError::Empty);
  }

  let write_err = |source| LinkError::Write {
    path: output.display().to_string(),
    source,
  };

  let constants: &BTreeMap<String, serde_json::Value> = &state.constants;
  let index = ImageIndex {
    version: IMAGE_FORMAT_VERSION,
    packages: packages
      .iter()
      .map(|p| PackageEntry {
        name: p.id.name.clone(),
        version: p.id.version.clone(),
        checksum: p.id.hash.clone(),
      })
      .collect(),
    specializations: state.specializations.iter().cloned().collect(),
    has_constants: !constants.is_empty(),
  };
  let index_json = serde_json::to_vec_pretty(&index)?;

  if let Some(parent) = output.parent() {
    fs::create_dir_all(parent).map_err(write_err)?;
  }
  let staging_dir = output.parent().unwrap_or(Path::new("."));

  let temp = NamedTempFile::new_in(staging_dir).map_err(write_err)?;
  let mut builder = tar::Builder::new(GzEncoder::new(temp, Compression::default()));

  append_entry(&mut builder, INDEX_PATH, &index_json).map_err(write_err)?;
  for package in &packages {
    let entry_path = format!("{}/{}.luac", CHUNKS_DIR, package.id.name);
    append_entry(&mut builder, &entry_path, &package.chunk).map_err(write_err)?;
  }

  let temp = builder
    .into_inner()
    .and_then(GzEncoder::finish)
    .map_err(write_err)?;

  // Stage the companion in full before any rename. The companion is renamed
  // first and the archive last, so a failed link never touches the output
  // path.
  let data_path = data_path_for(output);
  let staged_data = if constants.is_empty() {
    None
  } else {
    let json = serde_json::to_vec_pretty(constants)?;
    let mut data_temp = NamedTempFile::new_in(staging_dir).map_err(write_err)?;
    data_temp.write_all(&json).map_err(write_err)?;
    Some(data_temp)
  };

  let data_path = match staged_data {
    Some(data_temp) => {
      data_temp.persist(&data_path).map_err(|e| LinkError::Publish {
        path: data_path.display().to_string(),
        message: e.to_string(),
      })?;
      Some(data_path)
    }
    None => None,
  };

  temp.persist(output).map_err(|e| LinkError::Publish {
    path: output.display().to_string(),
    message: e.to_string(),
  })?;

  if data_path.is_none() {
    // Remove a stale companion so a reader never pairs the new archive with
    // old constants. Runs after the archive rename so a failed link leaves
    // the previous pair intact.
    let _ = fs::remove_file(data_path_for(output));
  }

  info!(
    path = %output.display(),
    packages = index.packages.len(),
    specializations = index.specializations.len(),
    "linked image"
  );

  Ok(ImageArtifact {
    path: output.to_path_buf(),
    data_path,
  })
}

fn append_entry<W: Write>(builder: &mut tar::Builder<W>, path: &str, bytes: &[u8]) -> io::Result<()> {
  let mut header = tar::Header::new_gnu();
  header.set_size(bytes.len() as u64);
  header.set_mode(0o644);
  header.set_cksum();
  builder.append_data(&mut header, path, bytes)
}
