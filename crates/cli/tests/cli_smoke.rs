//! CLI smoke tests for luaimg.
//!
//! These tests verify that all CLI commands run without panicking and
//! return appropriate exit codes. Each test points LUAIMG_DATA_DIR at a
//! private temp directory so the real default slot is never touched.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the luaimg binary with an isolated slot.
fn luaimg_cmd(data_dir: &TempDir) -> Command {
  let mut cmd = cargo_bin_cmd!("luaimg");
  cmd.env("LUAIMG_DATA_DIR", data_dir.path());
  cmd
}

/// Create a temp project with one package.
fn temp_project() -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(
    temp.path().join("image.toml"),
    r#"
      [packages.Example]
      version = "0.1.0"
      source = "Example.lua"
    "#,
  )
  .unwrap();
  std::fs::write(
    temp.path().join("Example.lua"),
    r#"
      local M = {}
      function M.hello(name) return "hello " .. name end
      return M
    "#,
  )
  .unwrap();
  temp
}

#[test]
#[serial]
fn help_works() {
  let slot = TempDir::new().unwrap();
  luaimg_cmd(&slot)
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("create"))
    .stdout(predicate::str::contains("restore"));
}

#[test]
#[serial]
fn version_works() {
  let slot = TempDir::new().unwrap();
  luaimg_cmd(&slot)
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("luaimg"));
}

#[test]
#[serial]
fn create_requires_a_target() {
  let slot = TempDir::new().unwrap();
  let project = temp_project();

  luaimg_cmd(&slot)
    .args(["create", "Example", "--project-dir"])
    .arg(project.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("--output"));
}

#[test]
#[serial]
fn create_rejects_conflicting_targets() {
  let slot = TempDir::new().unwrap();
  let project = temp_project();

  luaimg_cmd(&slot)
    .args(["create", "Example", "--replace-default", "--output", "out.img", "--project-dir"])
    .arg(project.path())
    .assert()
    .failure();
}

#[test]
#[serial]
fn create_builds_an_artifact() {
  let slot = TempDir::new().unwrap();
  let project = temp_project();
  let output = project.path().join("Example.img");

  luaimg_cmd(&slot)
    .args(["create", "Example", "--project-dir"])
    .arg(project.path())
    .arg("--output")
    .arg(&output)
    .assert()
    .success()
    .stdout(predicate::str::contains("Image created"));

  assert!(output.exists());
}

#[test]
#[serial]
fn create_with_unknown_package_fails() {
  let slot = TempDir::new().unwrap();
  let project = temp_project();

  luaimg_cmd(&slot)
    .args(["create", "Missing", "--output", "out.img", "--project-dir"])
    .arg(project.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("Missing"));
}

#[test]
#[serial]
fn replace_default_and_status_and_restore() {
  let slot = TempDir::new().unwrap();
  let project = temp_project();

  // No default yet.
  luaimg_cmd(&slot)
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("No default image"));

  // Restore before any replacement fails: there is nothing to restore.
  luaimg_cmd(&slot)
    .arg("restore")
    .assert()
    .failure()
    .stderr(predicate::str::contains("No backup"));

  luaimg_cmd(&slot)
    .args(["create", "Example", "--replace-default", "--project-dir"])
    .arg(project.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Default image replaced"));

  luaimg_cmd(&slot)
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("Example"));

  // Replace again so a backup exists, then restore it.
  luaimg_cmd(&slot)
    .args(["create", "Example", "--replace-default", "--project-dir"])
    .arg(project.path())
    .assert()
    .success();

  luaimg_cmd(&slot)
    .arg("restore")
    .assert()
    .success()
    .stdout(predicate::str::contains("Restored"));
}

#[test]
#[serial]
fn inspect_shows_packages() {
  let slot = TempDir::new().unwrap();
  let project = temp_project();
  let output = project.path().join("Example.img");

  luaimg_cmd(&slot)
    .args(["create", "Example", "--project-dir"])
    .arg(project.path())
    .arg("--output")
    .arg(&output)
    .assert()
    .success();

  luaimg_cmd(&slot)
    .arg("inspect")
    .arg(&output)
    .assert()
    .success()
    .stdout(predicate::str::contains("Example@0.1.0"));
}

#[test]
#[serial]
fn inspect_json_is_parseable() {
  let slot = TempDir::new().unwrap();
  let project = temp_project();
  let output = project.path().join("Example.img");

  luaimg_cmd(&slot)
    .args(["create", "Example", "--project-dir"])
    .arg(project.path())
    .arg("--output")
    .arg(&output)
    .assert()
    .success();

  let assert = luaimg_cmd(&slot)
    .arg("inspect")
    .arg(&output)
    .args(["--format", "json"])
    .assert()
    .success();

  let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
  let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
  assert_eq!(parsed["packages"][0]["name"], "Example");
}

#[test]
#[serial]
fn inspect_missing_image_fails() {
  let slot = TempDir::new().unwrap();
  luaimg_cmd(&slot)
    .args(["inspect", "/nonexistent/image.img"])
    .assert()
    .failure();
}

#[test]
#[serial]
fn status_json_is_parseable() {
  let slot = TempDir::new().unwrap();

  let assert = luaimg_cmd(&slot)
    .args(["status", "--format", "json"])
    .assert()
    .success();

  let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
  let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
  assert_eq!(parsed["has_backup"], false);
  assert!(parsed["default"].is_null());
}
