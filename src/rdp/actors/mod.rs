//! Actor proxies: local handles for server-side objects.
//!
//! The base proxy owns request correlation; the typed wrappers in this module
//! tree are thin veneers that name the requests and decode the responses.

mod addons;
mod breakpoint_list;
mod console;
mod descriptor;
mod grip;
mod preference;
mod root;
mod source;
mod target;
mod thread;
mod watcher;

pub use addons::AddonsActor;
pub use breakpoint_list::{BreakpointListActor, BreakpointOptions, BreakpointPosition};
pub use console::{ConsoleActor, EvalResult};
pub use descriptor::DescriptorActor;
pub use grip::{LongStringActor, ObjectGripActor};
pub use preference::PreferenceActor;
pub use root::RootActor;
pub use source::{SourceActor, SourceContent};
pub use target::TargetActor;
pub use thread::{StepKind, ThreadActor};
pub use watcher::{ResourceKind, TargetKind, ThreadConfigurationActor, WatcherActor};

use crate::error::{Error, Result};
use crate::rdp::connection::Connection;
use crate::rdp::event::{ActorCategory, parse_event};
use crate::rdp::packet::Packet;
use crate::rdp::pending::{CacheLookup, RequestQueues};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Weak;
use tokio::sync::oneshot;

/// Local handle for one server actor. Registered with the connection under
/// the actor's name; receives exactly the packets addressed to that name.
pub struct ActorProxy {
    name: String,
    category: ActorCategory,
    conn: Weak<Connection>,
    queues: RefCell<RequestQueues>,
}

impl ActorProxy {
    pub(crate) fn new(name: String, category: ActorCategory, conn: Weak<Connection>) -> Self {
        Self {
            name,
            category,
            conn,
            queues: RefCell::new(RequestQueues::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> ActorCategory {
        self.category
    }

    /// Send a request and await its response. `extra` must be a JSON object;
    /// `to` and `type` are filled in here. Responses arrive per actor in
    /// request order, which is what the pending queue relies on.
    pub async fn request(&self, kind: &str, extra: Value) -> Result<Value> {
        let mut packet = match extra {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                debug_assert!(false, "request payload must be an object, got {other}");
                Map::new()
            }
        };
        packet.insert("to".to_string(), Value::String(self.name.clone()));
        packet.insert("type".to_string(), Value::String(kind.to_string()));

        let (tx, rx) = oneshot::channel();
        let to_write = self.queues.borrow_mut().push(Value::Object(packet), tx);
        if let Some(packet) = to_write
            && let Err(e) = self.send_now(packet)
        {
            self.queues.borrow_mut().reject_all(|| Error::Disconnected);
            return Err(e);
        }
        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Memoized request for immutable queries. At most one wire request is
    /// issued per key; every caller observes the same raw response.
    pub async fn request_cached(&self, key: &'static str, kind: &str, extra: Value) -> Result<Value> {
        let lookup = self.queues.borrow_mut().cache_lookup(key);
        match lookup {
            CacheLookup::Hit(value) => Ok(value),
            CacheLookup::Wait(rx) => rx.await.map_err(|_| Error::Disconnected)?,
            CacheLookup::Miss => {
                let result = self.request(kind, extra).await;
                self.queues.borrow_mut().cache_settle(key, &result);
                result
            }
        }
    }

    fn send_now(&self, packet: Value) -> Result<()> {
        let conn = self.conn.upgrade().ok_or(Error::Disconnected)?;
        conn.enqueue(packet)
    }

    /// Route one inbound packet: event, error response or plain response.
    pub(crate) fn handle_packet(&self, packet: Packet) {
        if let Some(event) = parse_event(self.category, &packet) {
            if let Some(conn) = self.conn.upgrade() {
                let _ = conn.events().send(event);
            }
            return;
        }

        let result = match packet.to_actor_error() {
            Some(kind) => Err(Error::Actor {
                actor: self.name.clone(),
                kind,
            }),
            None => Ok(packet.into_value()),
        };

        let (consumed, next) = self.queues.borrow_mut().complete(result);
        if !consumed {
            log::warn!(
                target: "rdp",
                "unsolicited packet from `{}` dropped", self.name
            );
        }
        if let Some(packet) = next
            && let Err(e) = self.send_now(packet)
        {
            log::warn!(target: "rdp", "flush to `{}` failed: {e:#}", self.name);
            self.queues.borrow_mut().reject_all(|| Error::Disconnected);
        }
    }

    pub(crate) fn reject_pending(&self) {
        self.queues.borrow_mut().reject_all(|| Error::Disconnected);
    }
}

/// Decode a typed form out of one field of a response.
pub(crate) fn decode_field<T: serde::de::DeserializeOwned>(
    response: &Value,
    key: &str,
    actor: &str,
) -> Result<T> {
    let value = response
        .get(key)
        .cloned()
        .ok_or_else(|| Error::UnexpectedResponse(actor.to_string()))?;
    serde_json::from_value(value).map_err(|e| {
        log::warn!(target: "rdp", "bad `{key}` in response from `{actor}`: {e}");
        Error::UnexpectedResponse(actor.to_string())
    })
}

/// Decode the entire response body as a typed form.
pub(crate) fn decode_body<T: serde::de::DeserializeOwned>(response: Value, actor: &str) -> Result<T> {
    serde_json::from_value(response).map_err(|e| {
        log::warn!(target: "rdp", "bad response from `{actor}`: {e}");
        Error::UnexpectedResponse(actor.to_string())
    })
}
