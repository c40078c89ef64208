//! # Plugin Protocol
//!
//! Line-delimited JSON spoken between devctl and its plugins over the
//! child's stdin/stdout. A plugin prints one [`Handshake`] frame, then
//! answers [`Request`]s with [`Response`]s and, for streaming ops, a
//! sequence of [`Event`]s closed by an `end` event.

pub mod codec;
pub mod errors;
pub mod messages;
pub mod model;
pub mod server;
pub mod validate;

pub use codec::{decode_frame, decode_handshake, decode_incoming, encode_frame, write_frame, Incoming};
pub use errors::ProtocolError;
pub use messages::{ErrorBody, Event, Frame, Note, Request, RequestContext, Response, EVENT_END};
pub use model::{Capabilities, CommandArg, CommandSpec, Handshake, PROTOCOL_VERSION};
pub use server::PluginServer;
