//! The default image slot.
//!
//! The slot is a well-known location holding the image loaded when no
//! explicit artifact is named:
//!
//! ```text
//! {data_dir}/
//! ├── default.img          # active default (with optional default.data)
//! ├── default.backup.img   # pre-replacement original, written once
//! └── staging.img          # transient link target, never loaded
//! ```
//!
//! The backup is taken lazily before the first replacement and never
//! overwritten afterwards, so restore always returns to the oldest original.
//! Replace and restore publish via temp-and-rename and always move the
//! archive together with its companion data file, so the pair stays
//! consistent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{BACKUP_IMAGE_FILENAME, DEFAULT_IMAGE_FILENAME, STAGING_IMAGE_FILENAME};
use crate::image::{ImageArtifact, data_path_for};
use crate::platform::paths;

/// Errors operating on the default slot.
#[derive(Debug, Error)]
pub enum SlotError {
  /// Restore was requested but no backup exists.
  #[error("no backup image to restore")]
  NoBackup,

  /// Replace was handed an artifact that does not exist on disk.
  #[error("image artifact '{0}' does not exist")]
  MissingArtifact(String),

  #[error("failed to read '{path}': {source}")]
  Read {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to write '{path}': {source}")]
  Write {
    path: String,
    #[source]
    source: io::Error,
  },
}

/// Handle to a default-image slot directory.
#[derive(Debug, Clone)]
pub struct ImageSlot {
  dir: PathBuf,
}

impl ImageSlot {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  /// The slot in the standard data directory.
  pub fn default_location() -> Self {
    Self::new(paths::data_dir())
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn default_path(&self) -> PathBuf {
    self.dir.join(DEFAULT_IMAGE_FILENAME)
  }

  pub fn backup_path(&self) -> PathBuf {
    self.dir.join(BACKUP_IMAGE_FILENAME)
  }

  /// Transient link target for builds that replace the default in place.
  pub fn staging_path(&self) -> PathBuf {
    self.dir.join(STAGING_IMAGE_FILENAME)
  }

  pub fn has_default(&self) -> bool {
    self.default_path().exists()
  }

  pub fn has_backup(&self) -> bool {
    self.backup_path().exists()
  }

  /// Install an artifact as the new default.
  ///
  /// The first replacement backs up the current default (when one exists);
  /// later replacements leave the backup untouched.
  pub fn replace(&self, artifact: &ImageArtifact) -> Result<(), SlotError> {
    if !artifact.path.exists() {
      return Err(SlotError::MissingArtifact(artifact.path.display().to_string()));
    }

    fs::create_dir_all(&self.dir).map_err(|e| SlotError::Write {
      path: self.dir.display().to_string(),
      source: e,
    })?;

    let default = self.default_path();
    if default.exists() && !self.has_backup() {
      self.publish_pair(&default, &self.backup_path())?;
      info!(backup = %self.backup_path().display(), "backed up previous default image");
    }

    self.publish_pair(&artifact.path, &default)?;
    info!(path = %default.display(), "installed new default image");
    Ok(())
  }

  /// Bring back the backed-up original as the default. The backup itself is
  /// retained, so restore is idempotent.
  pub fn restore(&self) -> Result<(), SlotError> {
    let backup = self.backup_path();
    if !backup.exists() {
      return Err(SlotError::NoBackup);
    }

    self.publish_pair(&backup, &self.default_path())?;
    info!(path = %self.default_path().display(), "restored default image from backup");
    Ok(())
  }

  /// Copy an archive-and-companion pair to a destination. Both files are
  /// staged in full before any rename, and the archive rename comes last,
  /// so a failure leaves the destination pair exactly as it was.
  fn publish_pair(&self, from: &Path, to: &Path) -> Result<(), SlotError> {
    let from_data = data_path_for(from);
    let to_data = data_path_for(to);

    let archive = self.stage_file(from, to)?;
    let companion = if from_data.is_file() {
      Some(self.stage_file(&from_data, &to_data)?)
    } else {
      None
    };

    let had_companion = companion.is_some();
    if let Some(staged) = companion {
      self.persist_file(staged, &to_data)?;
    }
    self.persist_file(archive, to)?;
    if !had_companion {
      // Clear a stale destination companion once the new archive is in
      // place; removal never runs when the archive rename failed.
      let _ = fs::remove_file(&to_data);
    }

    debug!(from = %from.display(), to = %to.display(), "published slot pair");
    Ok(())
  }

  fn stage_file(&self, from: &Path, to: &Path) -> Result<NamedTempFile, SlotError> {
    let bytes = fs::read(from).map_err(|e| SlotError::Read {
      path: from.display().to_string(),
      source: e,
    })?;

    let write_err = |source| SlotError::Write {
      path: to.display().to_string(),
      source,
    };

    let temp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
    fs::write(temp.path(), &bytes).map_err(write_err)?;
    Ok(temp)
  }

  fn persist_file(&self, temp: NamedTempFile, to: &Path) -> Result<(), SlotError> {
    temp.persist(to).map_err(|e| SlotError::Write {
      path: to.display().to_string(),
      source: e.error,
    })?;
    Ok(())
  }
}
