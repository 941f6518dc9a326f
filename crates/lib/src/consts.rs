//! Shared constants for luaimg.

/// Application name, used for installation-wide directories.
pub const APP_NAME: &str = "luaimg";

/// Project manifest file name, relative to the project directory.
pub const MANIFEST_FILENAME: &str = "image.toml";

/// Lock file name, stored next to the manifest.
pub const LOCK_FILENAME: &str = "image.lock";

/// Extension of companion data files (shares the artifact's path stem).
pub const DATA_EXT: &str = "data";

/// Default slot artifact file name within the data directory.
pub const DEFAULT_IMAGE_FILENAME: &str = "default.img";

/// Backup slot artifact file name within the data directory.
pub const BACKUP_IMAGE_FILENAME: &str = "default.backup.img";

/// Staging artifact file name used while building toward the default slot.
pub const STAGING_IMAGE_FILENAME: &str = "staging.img";

/// Length of truncated object hashes.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;
