//! Plugin runtime: spawning plugins, correlating their responses and
//! demultiplexing their streams.

pub mod client;
pub mod context;
pub mod factory;
pub mod router;
pub mod spec;

pub use client::{call_typed, Client, PluginClient, STREAM_CAPACITY};
pub use context::{OpContext, RequestMeta};
pub use factory::{Factory, FactoryOptions};
pub use router::Router;
pub use spec::{sort_specs, PluginSpec};
