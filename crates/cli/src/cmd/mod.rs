mod create;
mod inspect;
mod restore;
mod status;

pub use create::{CreateArgs, cmd_create};
pub use inspect::cmd_inspect;
pub use restore::cmd_restore;
pub use status::cmd_status;
