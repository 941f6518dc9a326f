//! Command line interface for building and managing Lua session images.

mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// luaimg - build and manage persisted Lua session images
#[derive(Parser)]
#[command(name = "luaimg")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build an image from a project manifest
  Create {
    /// Package names to bake into the image
    #[arg(required = true)]
    packages: Vec<String>,

    /// Project directory holding image.toml (default: current directory)
    #[arg(short, long, default_value = ".")]
    project_dir: PathBuf,

    /// Write the artifact to this path instead of touching the default image
    #[arg(short, long, conflicts_with = "replace_default")]
    output: Option<PathBuf>,

    /// Install the result as the default image
    #[arg(long)]
    replace_default: bool,

    /// Build from scratch instead of on top of the base image
    #[arg(long)]
    no_incremental: bool,

    /// Precompile script to run inside the build session
    #[arg(long)]
    script: Option<PathBuf>,

    /// Recorded-statement file to merge in
    #[arg(long)]
    statements: Option<PathBuf>,

    /// Also force every zero-parameter function exported by the loaded packages
    #[arg(long)]
    infer: bool,

    /// Build on top of this image
    #[arg(long)]
    base: Option<PathBuf>,
  },

  /// Restore the backed-up original default image
  Restore,

  /// Show the contents of an image artifact
  Inspect {
    /// Path to the artifact
    image: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Show the state of the default image slot
  Status {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_filter = if cli.verbose { "info" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  match cli.command {
    Commands::Create {
      packages,
      project_dir,
      output,
      replace_default,
      no_incremental,
      script,
      statements,
      infer,
      base,
    } => cmd::cmd_create(cmd::CreateArgs {
      packages,
      project_dir,
      output,
      replace_default,
      no_incremental,
      script,
      statements,
      infer,
      base,
    }),
    Commands::Restore => cmd::cmd_restore(),
    Commands::Inspect { image, format } => cmd::cmd_inspect(&image, format),
    Commands::Status { format } => cmd::cmd_status(format),
  }
}
