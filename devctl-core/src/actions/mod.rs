//! # Actions
//!
//! The orchestrator ties the plugin runtime, pipeline, supervisor and state
//! file together into `up`, `down`, `plan` and `status`. The bus-facing
//! pieces live next to it: the UI transformer, the stream runner and the
//! action runner.

pub mod action_runner;
pub mod orchestrator;
pub mod stream_runner;
pub mod transform;

pub use action_runner::register_action_runner;
pub use orchestrator::{Orchestrator, OrchestratorOptions, RunReport, Session};
pub use stream_runner::{stream_key, StreamRunner};
pub use transform::register_ui_transformer;
