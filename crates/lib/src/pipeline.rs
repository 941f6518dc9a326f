//! The image creation pipeline.
//!
//! [`create_image`] strings the stages together: load the project, resolve
//! the package set, collect precompile statements, run a build session, link
//! the artifact, and (optionally) install it as the default. Each stage's
//! error carries enough context to tell the caller which stage failed.
//!
//! Builds that replace the default never link into the slot directly: the
//! artifact is staged inside the slot directory and installed through
//! [`ImageSlot::replace`], so a crashed build leaves at most a stale staging
//! file behind.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::image::{LinkError, data_path_for, link};
use crate::manifest::{ManifestError, Project};
use crate::resolve::{ResolveError, resolve};
use crate::session::{BuildSession, CancelFlag, SessionError};
use crate::slot::{ImageSlot, SlotError};
use crate::statement::{CollectError, collect_file};

/// Options for a single image build.
#[derive(Debug, Clone)]
pub struct CreateOptions {
  /// Directory holding the project manifest.
  pub project_dir: PathBuf,
  /// Package names to bake in (dependencies come along automatically).
  pub packages: Vec<String>,
  /// Explicit artifact destination. Mutually exclusive with
  /// `replace_default`.
  pub output: Option<PathBuf>,
  /// Install the result as the default image.
  pub replace_default: bool,
  /// Build on top of a base image instead of from scratch.
  pub incremental: bool,
  /// Precompile script to execute inside the session.
  pub script: Option<PathBuf>,
  /// Recorded-statement file to merge in.
  pub statements_file: Option<PathBuf>,
  /// Infer zero-argument statements from the loaded code.
  pub infer: bool,
  /// Explicit base image. Defaults to the current default image for
  /// incremental default-replacing builds.
  pub base_image: Option<PathBuf>,
  /// Slot override, for tests and sandboxed installs.
  pub slot: Option<ImageSlot>,
  /// Cooperative cancellation.
  pub cancel: CancelFlag,
}

impl CreateOptions {
  pub fn new(project_dir: impl Into<PathBuf>, packages: Vec<String>) -> Self {
    Self {
      project_dir: project_dir.into(),
      packages,
      output: None,
      replace_default: false,
      incremental: true,
      script: None,
      statements_file: None,
      infer: false,
      base_image: None,
      slot: None,
      cancel: CancelFlag::new(),
    }
  }
}

/// Errors from the pipeline, by stage.
#[derive(Debug, Error)]
pub enum CreateError {
  #[error("invalid options: {0}")]
  Options(String),

  #[error("failed to load project: {0}")]
  Manifest(#[from] ManifestError),

  #[error("failed to resolve packages: {0}")]
  Resolve(#[from] ResolveError),

  #[error("failed to collect precompile statements: {0}")]
  Collect(#[from] CollectError),

  #[error("build session failed: {0}")]
  Session(#[from] SessionError),

  #[error("failed to link image: {0}")]
  Link(#[from] LinkError),

  #[error("failed to update default image: {0}")]
  Slot(#[from] SlotError),
}

/// Build an image and return the path of the finished artifact.
pub fn create_image(opts: &CreateOptions) -> Result<PathBuf, CreateError> {
  if opts.output.is_some() && opts.replace_default {
    return Err(CreateError::Options(
      "an explicit output path cannot be combined with replacing the default image".to_string(),
    ));
  }
  if opts.output.is_none() && !opts.replace_default {
    return Err(CreateError::Options(
      "either an output path or replacing the default image must be requested".to_string(),
    ));
  }

  let slot = opts.slot.clone().unwrap_or_else(ImageSlot::default_location);

  let project = Project::load(&opts.project_dir)?;
  let ids = resolve(&project, &opts.packages)?;
  info!(packages = ids.len(), "resolved package set");

  let mut statements = BTreeSet::new();
  if let Some(path) = &opts.statements_file {
    statements.extend(collect_file(path)?);
  }

  let base = base_image(opts, &slot);
  if let Some(base) = &base {
    debug!(base = %base.display(), "building incrementally");
  }

  let mut session = BuildSession::start(base.as_deref(), opts.cancel.clone())?;
  session.load_packages(&project, &ids)?;
  if let Some(script) = &opts.script {
    statements.extend(session.collect_script(script)?);
  }
  if opts.infer {
    statements.extend(session.infer_statements()?);
  }
  session.compile(&statements)?;
  let state = session.finish()?;

  let target = match &opts.output {
    Some(path) => path.clone(),
    None => slot.staging_path(),
  };
  let artifact = link(&state, &target, opts.incremental)?;

  if opts.replace_default {
    slot.replace(&artifact)?;
    // The staged pair has been copied into the slot; drop it.
    let _ = fs::remove_file(&artifact.path);
    let _ = fs::remove_file(data_path_for(&artifact.path));
    return Ok(slot.default_path());
  }

  Ok(artifact.path)
}

/// Put the backed-up original default image back in place.
pub fn restore_default_image(slot: &ImageSlot) -> Result<PathBuf, SlotError> {
  slot.restore()?;
  Ok(slot.default_path())
}

fn base_image(opts: &CreateOptions, slot: &ImageSlot) -> Option<PathBuf> {
  if !opts.incremental {
    if opts.base_image.is_some() {
      warn!("ignoring base image for a non-incremental build");
    }
    return None;
  }
  if let Some(base) = &opts.base_image {
    return Some(base.clone());
  }
  if opts.replace_default && slot.has_default() {
    return Some(slot.default_path());
  }
  None
}
