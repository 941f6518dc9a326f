//! Implementation of the `luaimg create` command.
//!
//! Runs the full pipeline: resolve the requested packages, collect precompile
//! statements, execute a build session, link the artifact, and optionally
//! install it as the default image.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, anyhow, bail};
use tracing::info;

use luaimg_lib::pipeline::{CreateOptions, create_image};

use crate::output::{format_bytes, print_error, print_info, print_stat, print_success};

pub struct CreateArgs {
  pub packages: Vec<String>,
  pub project_dir: PathBuf,
  pub output: Option<PathBuf>,
  pub replace_default: bool,
  pub no_incremental: bool,
  pub script: Option<PathBuf>,
  pub statements: Option<PathBuf>,
  pub infer: bool,
  pub base: Option<PathBuf>,
}

pub fn cmd_create(args: CreateArgs) -> Result<()> {
  if args.output.is_none() && !args.replace_default {
    bail!("pass --output <path> or --replace-default to say where the image should go");
  }

  let mut opts = CreateOptions::new(&args.project_dir, args.packages.clone());
  opts.output = args.output;
  opts.replace_default = args.replace_default;
  opts.incremental = !args.no_incremental;
  opts.script = args.script;
  opts.statements_file = args.statements;
  opts.infer = args.infer;
  opts.base_image = args.base;

  print_info(&format!("Building image with {}", args.packages.join(", ")));

  let started = Instant::now();
  let path = match create_image(&opts) {
    Ok(path) => path,
    Err(e) => {
      print_error(&format!("Build failed: {}", e));
      return Err(anyhow!("{}", e));
    }
  };
  info!(path = %path.display(), "image created");

  let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

  println!();
  if args.replace_default {
    print_success("Default image replaced");
  } else {
    print_success("Image created");
  }
  print_stat("Path", &path.display().to_string());
  print_stat("Size", &format_bytes(size));
  print_stat("Elapsed", &format!("{:.1}s", started.elapsed().as_secs_f64()));

  Ok(())
}
