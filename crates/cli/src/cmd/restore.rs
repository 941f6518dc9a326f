//! Implementation of the `luaimg restore` command.

use anyhow::{Result, anyhow};

use luaimg_lib::pipeline::restore_default_image;
use luaimg_lib::slot::{ImageSlot, SlotError};

use crate::output::{print_error, print_success};

pub fn cmd_restore() -> Result<()> {
  let slot = ImageSlot::default_location();

  match restore_default_image(&slot) {
    Ok(path) => {
      print_success(&format!("Restored original default image at {}", path.display()));
      Ok(())
    }
    Err(e @ SlotError::NoBackup) => {
      print_error("No backup image exists; the default was never replaced.");
      Err(anyhow!("{}", e))
    }
    Err(e) => {
      print_error(&format!("Restore failed: {}", e));
      Err(anyhow!("{}", e))
    }
  }
}
