//! Core library for building and managing persisted Lua session images.
//!
//! An image bakes a resolved set of packages, their forced call
//! specializations, and registered constants into a single relocatable
//! artifact that loads without re-executing package sources from disk.
//!
//! The pipeline in [`pipeline`] ties the stages together:
//!
//! 1. [`manifest`]: load the project manifest and lock file.
//! 2. [`resolve`]: compute the ordered package closure.
//! 3. [`statement`]: collect precompile statements from files.
//! 4. [`session`]: load packages and force specializations in a Lua state.
//! 5. [`image`]: link the artifact, read and load it back.
//! 6. [`slot`]: manage the default image with backup and restore.

pub mod consts;
pub mod image;
pub mod manifest;
pub mod pipeline;
pub mod platform;
pub mod resolve;
pub mod session;
pub mod slot;
pub mod statement;
pub mod util;
