//! Async client/server engine for FreeSWITCH's Event Socket Layer (ESL).
//!
//! - [`Client`] dials FreeSWITCH and maintains a reconnecting inbound
//!   connection.
//! - [`server::listen_and_serve`] accepts FreeSWITCH-initiated outbound
//!   connections.
//! - [`Connection`] is the shared primitive both drivers build on: it owns
//!   the socket, serializes command writes, and dispatches events through a
//!   three-tier filter cascade.
//!
//! This crate does not install a `tracing` subscriber; wire one up in your
//! binary (`tracing_subscriber::fmt()`) to see its `debug`/`info`/`warn`
//! output.

mod command;
mod connection;
mod dispatch;
mod error;
mod event;
mod filter;
mod frame;
mod headers;
mod router;
mod client;
mod server;

pub use command::{
    Api, Auth, Command, Connect, DisableEvents, DivertEvents, Event as EventCommand, Exit,
    Filter, Linger, Log, MyEvents, SendEvent, SendMsg,
};
pub use connection::Connection;
pub use error::{Error, Result};
pub use event::{Event, EventHandler};
pub use frame::{content_type, RawResponse};
pub use client::Client;
pub use server::{listen_and_serve, HandlerContext, OutboundServer};
