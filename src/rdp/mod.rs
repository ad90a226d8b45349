//! The browser-facing side: framed transport, packet routing and actor
//! proxies for the remote debugging protocol.

pub mod actors;
pub mod connection;
pub mod event;
pub mod forms;
pub mod packet;
pub mod pending;
pub mod transport;

pub use connection::Connection;
pub use event::{ActorCategory, RdpEvent, Resource};
pub use packet::Packet;
