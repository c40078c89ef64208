//! # devctl Core Library
//!
//! The control plane behind the `devctl` binary: it starts plugin
//! processes, runs them through the `up` pipeline and supervises the
//! services they plan.
//!
//! ## Modules
//! - `runtime`: Plugin factory, client and response router.
//! - `config`, `discovery`, `repository`: From `.devctl.yaml` to running plugins.
//! - `patch`: Dotted-path edits of the dynamic config.
//! - `engine`: Pipeline phases, plan merging and plugin commands.
//! - `supervise`: Service processes, readiness probes and the service wrapper.
//! - `state`: `.devctl/state.json`, exit records and log tails.
//! - `process`: Process-group signalling and liveness.
//! - `bus`: In-process publish/subscribe for observers.
//! - `actions`: The orchestrator and its bus-facing runners.

pub mod actions;
pub mod bus;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod patch;
pub mod process;
pub mod repository;
pub mod runtime;
pub mod state;
pub mod supervise;

pub use error::{DevctlError, OpError, Result};
