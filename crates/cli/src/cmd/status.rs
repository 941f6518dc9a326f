//! Implementation of the `luaimg status` command.
//!
//! Displays the state of the default image slot: whether a default and a
//! backup exist, and what the default contains.

use anyhow::Result;

use luaimg_lib::image::ImageFile;
use luaimg_lib::slot::ImageSlot;

use crate::output::{OutputFormat, format_bytes, print_info, print_json, print_stat, print_success};

pub fn cmd_status(format: OutputFormat) -> Result<()> {
  let slot = ImageSlot::default_location();

  if format.is_json() {
    let default = slot.has_default().then(|| describe(&slot));
    print_json(&serde_json::json!({
      "slot_dir": slot.dir().display().to_string(),
      "default": default,
      "has_backup": slot.has_backup(),
    }))?;
    return Ok(());
  }

  print_stat("Slot", &slot.dir().display().to_string());

  if !slot.has_default() {
    print_info("No default image installed. Run 'luaimg create --replace-default' to build one.");
    return Ok(());
  }

  let size = std::fs::metadata(slot.default_path()).map(|m| m.len()).unwrap_or(0);
  print_success(&format!("Default image: {}", slot.default_path().display()));
  print_stat("Size", &format_bytes(size));

  match ImageFile::read(&slot.default_path()) {
    Ok(image) => {
      let names: Vec<_> = image.package_names().collect();
      print_stat("Packages", &names.join(", "));
      print_stat("Specializations", &image.index.specializations.len().to_string());
    }
    Err(e) => {
      print_info(&format!("Default image is unreadable: {}", e));
    }
  }

  if slot.has_backup() {
    print_stat("Backup", &slot.backup_path().display().to_string());
  } else {
    print_stat("Backup", "none");
  }

  Ok(())
}

fn describe(slot: &ImageSlot) -> serde_json::Value {
  let path = slot.default_path();
  let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
  match ImageFile::read(&path) {
    Ok(image) => serde_json::json!({
      "path": path.display().to_string(),
      "size_bytes": size,
      "packages": image.package_names().collect::<Vec<_>>(),
      "specializations": image.index.specializations.len(),
    }),
    Err(e) => serde_json::json!({
      "path": path.display().to_string(),
      "size_bytes": size,
      "error": e.to_string(),
    }),
  }
}
