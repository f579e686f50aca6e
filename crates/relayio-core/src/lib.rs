//! Shared types of the relayio Socket.IO layer.
//!
//! This crate is what parsers and adapters depend on, so that they never need
//! the full `relayio` crate:
//! * [`packet`]: the Socket.IO packet model
//! * [`value`]: [`PayloadValue`], a json-like value with binary leaves
//! * [`parser`]: the [`Parse`](parser::Parse) trait implemented by every wire format
//! * [`adapter`]: room bookkeeping and the adapter traits

pub mod adapter;
pub mod errors;
pub mod packet;
pub mod parser;
pub mod value;

pub use relayio_engine_core::{Sid, Str};
pub use value::PayloadValue;

/// Identifies a server in a cluster.
pub type Uid = Sid;
