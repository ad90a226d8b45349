//! The editor-facing side: DAP framing and message envelopes.

pub mod protocol;
pub mod transport;

pub use protocol::{DapEmitter, DapRequest};
pub use transport::{DapReader, DapWriter};
