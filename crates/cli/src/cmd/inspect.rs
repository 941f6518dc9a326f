//! Implementation of the `luaimg inspect` command.
//!
//! Reads an artifact without instantiating it and prints its index: baked
//! packages, forced specializations, and registered constants.

use std::path::Path;

use anyhow::{Result, anyhow};

use luaimg_lib::image::{ImageFile, data_path_for};

use crate::output::{self, OutputFormat, format_bytes, print_error, print_json, print_stat, print_success};

pub fn cmd_inspect(path: &Path, format: OutputFormat) -> Result<()> {
  let image = match ImageFile::read(path) {
    Ok(image) => image,
    Err(e) => {
      print_error(&format!("Cannot inspect '{}': {}", path.display(), e));
      return Err(anyhow!("{}", e));
    }
  };

  if format.is_json() {
    let packages: Vec<_> = image
      .index
      .packages
      .iter()
      .map(|p| {
        serde_json::json!({
          "name": p.name,
          "version": p.version.to_string(),
          "checksum": p.checksum.0,
        })
      })
      .collect();
    let specializations: Vec<_> = image.index.specializations.iter().map(|s| s.to_string()).collect();
    print_json(&serde_json::json!({
      "path": path.display().to_string(),
      "format_version": image.index.version,
      "packages": packages,
      "specializations": specializations,
      "constants": image.constants,
    }))?;
    return Ok(());
  }

  let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

  print_success(&format!("Image {}", path.display()));
  print_stat("Format version", &image.index.version.to_string());
  print_stat("Size", &format_bytes(size));

  println!();
  println!("Packages ({}):", image.index.packages.len());
  for entry in &image.index.packages {
    println!(
      "  {} {}@{} [{}]",
      output::symbols::INFO,
      entry.name,
      entry.version,
      entry.checksum
    );
  }

  if !image.index.specializations.is_empty() {
    println!();
    println!("Specializations ({}):", image.index.specializations.len());
    for statement in &image.index.specializations {
      println!("  {} {}", output::symbols::INFO, statement);
    }
  }

  if image.index.has_constants {
    println!();
    println!("Constants ({}):", image.constants.len());
    for name in image.constants.keys() {
      println!("  {} {}", output::symbols::INFO, name);
    }
    print_stat("Data file", &data_path_for(path).display().to_string());
  }

  Ok(())
}
