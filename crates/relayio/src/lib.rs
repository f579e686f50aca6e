#![cfg_attr(docsrs, feature(doc_cfg))]
//! relayio is a Socket.IO v5 server that works as a tower layer or service.
//! It plugs into any [`tower`](https://docs.rs/tower/latest/tower/)/[`tokio`]/[`hyper`] stack.
//!
//! ## Table of contents
//! * [Usage](#usage)
//! * [Handlers](#handlers)
//! * [Emitting data](#emitting-data)
//! * [Acknowledgements](#acknowledgements)
//! * [Per socket state](#per-socket-state)
//! * [Adapters](#adapters)
//! * [Parsers](#parsers)
//! * [Feature flags](#feature-flags)
//!
//! ## Usage
//! ```no_run
//! # use relayio::{SocketIo, extract::{Data, SocketRef}};
//! # use serde::Deserialize;
//! #[derive(Deserialize)]
//! struct Message { room: String, text: String }
//!
//! let (svc, io) = SocketIo::new_svc();
//! io.ns("/", async |socket: SocketRef| {
//!     socket.on("join", async |socket: SocketRef, Data(room): Data<String>| {
//!         socket.join(room);
//!     });
//!     socket.on("message", async |socket: SocketRef, Data(msg): Data<Message>| {
//!         socket.to(msg.room).emit("message", &msg.text).await.ok();
//!     });
//! });
//! // `svc` is served with hyper or any tower compatible framework.
//! ```
//!
//! ## Handlers
//! Handlers are async closures whose arguments are extractors:
//! * [`ConnectHandler`] and [`ConnectMiddleware`]: called when a socket connects to a namespace.
//!   A middleware returning an error rejects the connection with a `connect_error` packet.
//! * [`MessageHandler`]: called when the socket receives an event registered with
//!   [`Socket::on`](socket::Socket::on).
//! * [`DisconnectHandler`]: called when the socket leaves the namespace.
//!
//! Check the [`extract`] module doc for the available extractors.
//!
//! ## Emitting data
//! Data is serialized with [`serde`]. A tuple is spread into several arguments,
//! any other value is sent as a single argument. Binary data ([`bytes::Bytes`]) is sent
//! as binary attachments.
//!
//! Operators select the sockets to emit to:
//! * `to` / `within`: the sockets of the given rooms
//! * `except`: without the sockets of the given rooms
//! * `local`: only the sockets of this server when running in a cluster
//! * `broadcast`: every socket except the sender
//! * `volatile`: the packet is dropped for the sockets whose buffer is full
//! * `timeout`: a custom timeout for acknowledgements
//!
//! Check the [`operators`] module doc for more details on operators.
//!
//! ## Acknowledgements
//! * [`AckSender`] answers the acknowledgement asked by the client.
//! * [`Socket::emit_with_ack`](socket::Socket::emit_with_ack),
//!   [`BroadcastOperators::emit_with_ack`](operators::BroadcastOperators::emit_with_ack)
//!   and [`SocketIo::emit_with_ack`] return an [`AckStream`](ack::AckStream)
//!   that can be awaited as a future or consumed as a stream.
//!
//! ## Per socket state
//! Every socket holds an [`Extensions`](extensions::Extensions) bag, reachable with the
//! [`Extension`](extract::Extension) and [`MaybeExtension`](extract::MaybeExtension) extractors.
//!
//! ## Adapters
//! Rooms and broadcasts go through an [`Adapter`]. The default [`LocalAdapter`] keeps
//! everything in memory. The `relayio-cluster` crate shares the namespaces between several servers.
//!
//! ## Parsers
//! The common parser is used by default. The MessagePack parser is available with the
//! `msgpack` feature through [`SocketIoBuilder::with_parser`] and [`ParserConfig::msgpack`].
//!
//! ## Feature flags
//! * `tracing`: enable logging with [`tracing`](https://docs.rs/tracing) calls
//! * `msgpack`: enable the MessagePack parser
//!
//! [`Adapter`]: adapter::Adapter
//! [`LocalAdapter`]: adapter::LocalAdapter
//! [`ConnectHandler`]: handler::ConnectHandler
//! [`ConnectMiddleware`]: handler::ConnectMiddleware
//! [`MessageHandler`]: handler::MessageHandler
//! [`DisconnectHandler`]: handler::DisconnectHandler
//! [`AckSender`]: extract::AckSender
pub mod ack;
pub mod adapter;
pub mod extensions;
pub mod extract;
pub mod handler;
pub mod layer;
pub mod operators;
pub mod parser;
pub mod service;
pub mod socket;

pub use errors::{
    AckError, AdapterError, BroadcastError, DisconnectError, EmitWithAckError, NsInsertError,
    ParseError, RemoteActionError, SendError, SocketError,
};
pub use config::{ParserConfig, SocketIoBuilder, SocketIoConfig};
pub use io::SocketIo;
pub use relayio_core::{PayloadValue, Sid, Uid};
pub use relayio_engine::TransportType;

mod client;
mod config;
mod errors;
mod io;
mod ns;
