//! Image loading.
//!
//! The loader instantiates an artifact into a Lua state: constants are made
//! available under `image.constants`, then every package chunk executes in
//! index order and registers its module value in `package.loaded`. The same
//! routine backs both the standalone [`load_image`] entry point and base-image
//! initialization in build sessions.

use std::path::Path;

use mlua::prelude::*;
use mlua::{ChunkMode, LuaSerdeExt};
use thiserror::Error;
use tracing::debug;

use crate::image::{ImageError, ImageFile, ImageIndex};
use crate::session::loaded_table;
use crate::statement::{Statement, TypeTag};

/// Errors loading an image into a Lua state.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error(transparent)]
  Image(#[from] ImageError),

  /// A chunk failed to execute.
  #[error("image runtime error: {message}")]
  Runtime { message: String },
}

/// Execute an image's chunks inside an existing Lua state.
///
/// Chunks run in index load order, so each package finds its dependencies in
/// `package.loaded` already. A chunk returning nil is registered as `true`,
/// matching what `require` does for modules without a return value.
pub(crate) fn instantiate(lua: &Lua, image: &ImageFile) -> LuaResult<()> {
  let globals = lua.globals();
  let image_table = match globals.get::<LuaValue>("image")? {
    LuaValue::Table(t) => t,
    _ => {
      let t = lua.create_table()?;
      globals.set("image", &t)?;
      t
    }
  };
  image_table.set("constants", lua.to_value(&image.constants)?)?;

  let loaded = loaded_table(lua)?;
  for entry in &image.index.packages {
    let value = lua
      .load(image.chunks[&entry.name].as_slice())
      .set_name(format!("@{}", entry.name))
      .set_mode(ChunkMode::Binary)
      .call::<LuaValue>(())?;
    let value = if value.is_nil() { LuaValue::Boolean(true) } else { value };
    loaded.set(entry.name.as_str(), value)?;
    debug!(package = %entry.name, "instantiated package chunk");
  }

  Ok(())
}

/// An artifact instantiated into its own Lua state.
pub struct LoadedImage {
  lua: Lua,
  index: ImageIndex,
}

/// Read an artifact from disk and instantiate it.
pub fn load_image(path: &Path) -> Result<LoadedImage, LoadError> {
  let image = ImageFile::read(path)?;
  let lua = Lua::new();
  instantiate(&lua, &image).map_err(|e| LoadError::Runtime {
    message: e.to_string(),
  })?;

  Ok(LoadedImage {
    lua,
    index: image.index,
  })
}

impl LoadedImage {
  /// Names of the baked packages, in load order.
  pub fn package_names(&self) -> impl Iterator<Item = &str> {
    self.index.packages.iter().map(|p| p.name.as_str())
  }

  /// Whether a specialization for the given call signature was baked in.
  pub fn has_specialization(&self, callable: &str, arg_types: &[TypeTag]) -> bool {
    let probe = Statement::new(callable, arg_types.to_vec());
    self.index.specializations.contains(&probe)
  }

  pub fn lua(&self) -> &Lua {
    &self.lua
  }

  pub fn index(&self) -> &ImageIndex {
    &self.index
  }
}
