//! Build sessions.
//!
//! A build session is the transient Lua state in which packages are loaded
//! and precompile statements are executed before linking. Sessions move
//! through phases:
//!
//! ```text
//! Starting → Loading → Compiling → Ready
//!      \________\_________\→ Failed
//! ```
//!
//! A session is created fresh or initialized from a base image (the
//! incremental case: everything baked into the base is present without
//! re-loading). After [`BuildSession::finish`] the resulting state is
//! immutable; the session itself is consumed and cannot be reused.
//!
//! Loading packages and running precompile scripts executes arbitrary user
//! code with the host's full privileges. That is the feature, not an
//! oversight: callers opt into it when they build an image.

mod recorder;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mlua::prelude::*;
use mlua::LuaSerdeExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::image::{ImageError, ImageFile};
use crate::manifest::Project;
use crate::resolve::PackageId;
use crate::statement::{CollectError, Statement};

use recorder::Recorder;

/// Cooperative cancellation flag, checked between package loads and between
/// precompile statements.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Relaxed);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Relaxed)
  }
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Starting,
  Loading,
  Compiling,
  Ready,
  Failed,
}

/// Errors that fail the whole build session.
#[derive(Debug, Error)]
pub enum SessionError {
  /// The session's Lua state could not be set up.
  #[error("failed to start session: {0}")]
  Start(String),

  /// The base image could not be read.
  #[error(transparent)]
  BaseImage(#[from] ImageError),

  /// The base image was read but its chunks failed to execute.
  #[error("failed to initialize from base image '{path}': {message}")]
  Base { path: String, message: String },

  /// A package's source file is missing.
  #[error("source for package '{package}' not found at '{path}'")]
  MissingSource { package: String, path: String },

  /// A package failed to compile or execute while loading.
  #[error("failed to load package '{package}' from '{path}': {message}")]
  Load {
    package: String,
    path: String,
    message: String,
  },

  /// A resolved package has no manifest entry (resolver/manifest mismatch).
  #[error("package '{package}' is not declared in the manifest")]
  Undeclared { package: String },

  /// Loaded code could not be inspected for statement inference.
  #[error("failed to inspect loaded code: {0}")]
  Inspect(String),

  /// The build was cancelled externally.
  #[error("build cancelled")]
  Cancelled,

  /// An operation was attempted in the wrong phase.
  #[error("cannot {op} in {phase:?} phase")]
  Phase { phase: Phase, op: &'static str },
}

/// A package loaded into the session, with its dumped chunk.
#[derive(Debug, Clone)]
pub struct LoadedPackage {
  pub id: PackageId,
  /// Dumped bytecode of the package's top-level chunk.
  pub chunk: Vec<u8>,
  /// Whether the package came in via the base image.
  pub from_base: bool,
}

/// The immutable result of a finished session, handed to the linker.
#[derive(Debug, Clone)]
pub struct SessionState {
  /// Loaded packages, in load order (base packages first).
  pub packages: Vec<LoadedPackage>,
  /// Specializations forced during the compile phase (including those
  /// carried over from the base image).
  pub specializations: BTreeSet<Statement>,
  /// Constants registered via `image.constant(name, value)`.
  pub constants: BTreeMap<String, serde_json::Value>,
}

/// A live build session.
pub struct BuildSession {
  lua: Lua,
  phase: Phase,
  packages: Vec<LoadedPackage>,
  specializations: BTreeSet<Statement>,
  constants: Rc<RefCell<BTreeMap<String, serde_json::Value>>>,
  cancel: CancelFlag,
}

impl BuildSession {
  /// Start a session, optionally initialized from a base image.
  pub fn start(base: Option<&Path>, cancel: CancelFlag) -> Result<Self, SessionError> {
    let lua = Lua::new();
    let constants = Rc::new(RefCell::new(BTreeMap::new()));
    register_image_global(&lua, constants.clone()).map_err(|e| SessionError::Start(e.to_string()))?;

    let mut session = Self {
      lua,
      phase: Phase::Starting,
      packages: Vec::new(),
      specializations: BTreeSet::new(),
      constants,
      cancel,
    };

    if let Some(path) = base {
      let image = ImageFile::read(path)?;
      crate::image::load::instantiate(&session.lua, &image).map_err(|e| {
        session.phase = Phase::Failed;
        SessionError::Base {
          path: path.display().to_string(),
          message: e.to_string(),
        }
      })?;

      for entry in &image.index.packages {
        session.packages.push(LoadedPackage {
          id: entry.id(),
          chunk: image.chunks[&entry.name].clone(),
          from_base: true,
        });
      }
      session.specializations.extend(image.index.specializations.iter().cloned());
      session.constants.borrow_mut().extend(image.constants.clone());

      info!(
        base = %path.display(),
        packages = session.packages.len(),
        "session initialized from base image"
      );
    }

    session.phase = Phase::Loading;
    Ok(session)
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  /// Load the resolved packages, in order. Packages already provided by the
  /// base image are skipped.
  pub fn load_packages(&mut self, project: &Project, ids: &[PackageId]) -> Result<(), SessionError> {
    if self.phase != Phase::Loading {
      return Err(SessionError::Phase {
        phase: self.phase,
        op: "load packages",
      });
    }

    for id in ids {
      match self.load_package(project, id) {
        Ok(()) => {}
        Err(e) => {
          self.phase = Phase::Failed;
          return Err(e);
        }
      }
    }
    Ok(())
  }

  fn load_package(&mut self, project: &Project, id: &PackageId) -> Result<(), SessionError> {
    if self.cancel.is_cancelled() {
      return Err(SessionError::Cancelled);
    }

    if self.packages.iter().any(|p| p.id.name == id.name) {
      debug!(package = %id, "already present (base image), skipping load");
      return Ok(());
    }

    let def = project.package(&id.name).ok_or_else(|| SessionError::Undeclared {
      package: id.name.clone(),
    })?;
    let source = project.source_path(def);

    let src = match fs::read_to_string(&source) {
      Ok(src) => src,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(SessionError::MissingSource {
          package: id.name.clone(),
          path: source.display().to_string(),
        });
      }
      Err(e) => {
        return Err(SessionError::Load {
          package: id.name.clone(),
          path: source.display().to_string(),
          message: e.to_string(),
        });
      }
    };

    let load_err = |e: LuaError| SessionError::Load {
      package: id.name.clone(),
      path: source.display().to_string(),
      message: e.to_string(),
    };

    let func = self
      .lua
      .load(&src)
      .set_name(format!("@{}", source.display()))
      .into_function()
      .map_err(load_err)?;

    // Dump before execution: the chunk is what gets baked into the image.
    let chunk = func.dump(false);

    let value = func.call::<LuaValue>(()).map_err(load_err)?;
    let value = if value.is_nil() { LuaValue::Boolean(true) } else { value };
    loaded_table(&self.lua)
      .and_then(|t| t.set(id.name.as_str(), value))
      .map_err(load_err)?;

    info!(package = %id, "loaded package");

    self.packages.push(LoadedPackage {
      id: id.clone(),
      chunk,
      from_base: false,
    });
    Ok(())
  }

  /// Run a precompile script to completion inside the session, recording
  /// every call with resolvable argument types.
  ///
  /// A script error discards everything the script recorded and fails the
  /// build; partial recordings never leak into the statement set.
  pub fn collect_script(&mut self, path: &Path) -> Result<BTreeSet<Statement>, CollectError> {
    let script_err = |message: String| CollectError::Script {
      path: path.display().to_string(),
      message,
    };

    if self.phase != Phase::Loading {
      return Err(script_err(format!("session is in {:?} phase", self.phase)));
    }

    let src = fs::read_to_string(path).map_err(|e| script_err(format!("cannot read script: {}", e)))?;

    let tables = self.package_tables().map_err(|e| script_err(e.to_string()))?;
    let recorder = Recorder::install(&self.lua, &tables).map_err(|e| script_err(e.to_string()))?;

    let run = self
      .lua
      .load(&src)
      .set_name(format!("@{}", path.display()))
      .exec();

    match run {
      Ok(()) => {
        let recorded = recorder.uninstall().map_err(|e| script_err(e.to_string()))?;
        info!(script = %path.display(), recorded = recorded.len(), "precompile script finished");
        Ok(recorded)
      }
      Err(e) => {
        // All-or-nothing: drop whatever was recorded before the failure.
        let _ = recorder.uninstall();
        self.phase = Phase::Failed;
        Err(script_err(e.to_string()))
      }
    }
  }

  /// Synthesize statements from the loaded code itself.
  ///
  /// Lua carries no static argument types to draw on, so inference yields a
  /// zero-argument statement per exported package function. The compile
  /// phase filters the set: functions that cannot run argument-free fail
  /// their forced call and are skipped there.
  pub fn infer_statements(&self) -> Result<BTreeSet<Statement>, SessionError> {
    let inspect_err = |e: LuaError| SessionError::Inspect(e.to_string());

    let mut inferred = BTreeSet::new();
    for (pkg, table) in self.package_tables().map_err(inspect_err)? {
      for pair in table.pairs::<LuaValue, LuaValue>() {
        if let (LuaValue::String(key), LuaValue::Function(_)) = pair.map_err(inspect_err)? {
          inferred.insert(Statement::new(format!("{}.{}", pkg, key.to_string_lossy()), Vec::new()));
        }
      }
    }

    debug!(count = inferred.len(), "inferred zero-argument statements from loaded code");
    Ok(inferred)
  }

  fn package_tables(&self) -> LuaResult<Vec<(String, LuaTable)>> {
    let loaded = loaded_table(&self.lua)?;
    let mut tables = Vec::new();
    for pkg in &self.packages {
      if let Ok(LuaValue::Table(t)) = loaded.get::<LuaValue>(pkg.id.name.as_str()) {
        tables.push((pkg.id.name.clone(), t));
      }
    }
    Ok(tables)
  }

  /// Execute precompile statements, forcing their specializations into the
  /// session. Statements whose callable is unavailable, or whose forced call
  /// errors, are skipped with a warning.
  pub fn compile(&mut self, statements: &BTreeSet<Statement>) -> Result<(), SessionError> {
    if self.phase != Phase::Loading && self.phase != Phase::Compiling {
      return Err(SessionError::Phase {
        phase: self.phase,
        op: "compile statements",
      });
    }
    self.phase = Phase::Compiling;

    for statement in statements {
      if self.cancel.is_cancelled() {
        self.phase = Phase::Failed;
        return Err(SessionError::Cancelled);
      }

      let Some(func) = self.resolve_callable(&statement.callable) else {
        warn!(statement = %statement, "callable unavailable, skipping statement");
        continue;
      };

      let args: LuaResult<Vec<LuaValue>> = statement
        .arg_types
        .iter()
        .map(|t| t.synthesize(&self.lua))
        .collect();

      let result = args.and_then(|args| func.call::<LuaMultiValue>(LuaMultiValue::from_vec(args)));
      match result {
        Ok(_) => {
          debug!(statement = %statement, "forced specialization");
          self.specializations.insert(statement.clone());
        }
        Err(e) => {
          warn!(statement = %statement, error = %e, "forced call failed, skipping statement");
        }
      }
    }
    Ok(())
  }

  fn resolve_callable(&self, callable: &str) -> Option<LuaFunction> {
    let mut segments = callable.split('.');
    let root = segments.next()?;

    let loaded = loaded_table(&self.lua).ok()?;
    let mut value: LuaValue = match loaded.get::<LuaValue>(root) {
      Ok(v) if !v.is_nil() => v,
      _ => self.lua.globals().get::<LuaValue>(root).ok()?,
    };

    for segment in segments {
      let LuaValue::Table(table) = value else {
        return None;
      };
      value = table.get::<LuaValue>(segment).ok()?;
    }

    match value {
      LuaValue::Function(f) => Some(f),
      _ => None,
    }
  }

  /// Seal the session and hand its state to the linker.
  pub fn finish(mut self) -> Result<SessionState, SessionError> {
    if self.phase != Phase::Loading && self.phase != Phase::Compiling {
      return Err(SessionError::Phase {
        phase: self.phase,
        op: "finish",
      });
    }
    self.phase = Phase::Ready;

    let constants = self.constants.borrow().clone();
    info!(
      packages = self.packages.len(),
      specializations = self.specializations.len(),
      constants = constants.len(),
      "session ready for linking"
    );

    Ok(SessionState {
      packages: self.packages,
      specializations: self.specializations,
      constants,
    })
  }
}

/// Register the `image` global: `image.constant(name, value)` records a
/// constant for the companion data file.
fn register_image_global(
  lua: &Lua,
  sink: Rc<RefCell<BTreeMap<String, serde_json::Value>>>,
) -> LuaResult<()> {
  let image = lua.create_table()?;

  let constant = lua.create_function(move |lua, (name, value): (String, LuaValue)| {
    let json: serde_json::Value = lua.from_value(value)?;
    sink.borrow_mut().insert(name, json);
    Ok(())
  })?;
  image.set("constant", constant)?;

  lua.globals().set("image", image)?;
  Ok(())
}

/// The `package.loaded` table of a Lua state.
pub(crate) fn loaded_table(lua: &Lua) -> LuaResult<LuaTable> {
  lua.globals().get::<LuaTable>("package")?.get::<LuaTable>("loaded")
}
