//! OS process helpers shared by the plugin runtime and the supervisor.
//!
//! Every child devctl spawns leads its own process group, so signals sent
//! here reach the whole subtree a plugin or service may have forked.

mod group;
mod liveness;

pub use group::{signal_group, terminate_group, wait_dead, KILL_GRACE};
pub use liveness::{is_zombie, process_alive};
