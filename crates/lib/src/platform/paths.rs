//! Installation-wide directories.
//!
//! The default image slot lives under the data directory. `LUAIMG_DATA_DIR`
//! overrides it so tests (and sandboxed installs) can relocate all persistent
//! state.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "LUAIMG_DATA_DIR";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  let userprofile = std::env::var("USERPROFILE").expect("USERPROFILE not set");
  PathBuf::from(userprofile)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  let home = std::env::var("HOME").expect("HOME not set");
  PathBuf::from(home)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
    return PathBuf::from(dir);
  }
  let appdata = std::env::var("APPDATA").expect("APPDATA not set");
  PathBuf::from(appdata).join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
    return PathBuf::from(dir);
  }
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn env_override_takes_precedence() {
    temp_env::with_vars(
      [
        (DATA_DIR_ENV, Some("/custom/luaimg")),
        ("XDG_DATA_HOME", Some("/custom/data")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(data_dir(), PathBuf::from("/custom/luaimg"));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        (DATA_DIR_ENV, None::<&str>),
        ("XDG_DATA_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(data_dir(), PathBuf::from("/home/user/.local/share").join(APP_NAME));
      },
    );
  }
}
