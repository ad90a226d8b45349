//! Typed events decoded at the dispatch boundary.
//!
//! Inbound packets that are not responses become one of these variants.
//! Unknown shapes are logged and dropped by the connection; they are never
//! fatal.

use crate::rdp::forms::{
    ConsoleMessage, DescriptorForm, ErrorMessage, FrameForm, PauseReason, RootTraits, SourceForm,
    TargetForm, ThreadState, ThreadStateKind,
};
use crate::rdp::packet::Packet;
use serde_json::Value;

#[derive(Debug)]
pub enum RdpEvent {
    /// The root actor's hello; carries the server traits.
    RootInit { traits: RootTraits },
    TabOpened { descriptor: DescriptorForm },
    TabListChanged,
    DescriptorDestroyed { descriptor: String },
    TargetAvailable { watcher: String, form: TargetForm },
    TargetDestroyed { watcher: String, target: String },
    Resources {
        target: String,
        resources: Vec<Resource>,
    },
    /// A frame target is about to navigate; console state resets.
    WillNavigate { target: String, url: Option<String> },
    /// Ordering marker the session enqueues behind the first target
    /// enumeration; it never appears on the wire.
    EnumerationCheckpoint,
    /// The remote socket closed or the connection was torn down.
    Disconnected,
}

#[derive(Debug)]
pub enum Resource {
    ConsoleMessage(ConsoleMessage),
    ErrorMessage(ErrorMessage),
    Source(SourceForm),
    ThreadState(ThreadState),
}

/// What kind of server object an actor proxy fronts. Decides which inbound
/// packets are events rather than responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorCategory {
    Root,
    Descriptor,
    Watcher,
    Target,
    Thread,
    Console,
    Source,
    BreakpointList,
    ThreadConfiguration,
    ObjectGrip,
    LongString,
    Preference,
    Addons,
}

/// Decode `packet` as an event of `category`, or `None` when the packet is a
/// response (or an event kind this bridge does not consume).
pub fn parse_event(category: ActorCategory, packet: &Packet) -> Option<RdpEvent> {
    match category {
        ActorCategory::Root => parse_root_event(packet),
        ActorCategory::Descriptor => parse_descriptor_event(packet),
        ActorCategory::Watcher => parse_watcher_event(packet),
        ActorCategory::Target => parse_target_event(packet),
        _ => None,
    }
}

fn parse_root_event(packet: &Packet) -> Option<RdpEvent> {
    // The hello packet has no `type`; it is recognized by its payload.
    if packet.get("applicationType").is_some() {
        let traits = packet
            .get("traits")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        return Some(RdpEvent::RootInit { traits });
    }
    match packet.kind()? {
        "tabOpened" => {
            let descriptor = deserialize_field(packet, "tab")?;
            Some(RdpEvent::TabOpened { descriptor })
        }
        "tabListChanged" => Some(RdpEvent::TabListChanged),
        _ => None,
    }
}

fn parse_descriptor_event(packet: &Packet) -> Option<RdpEvent> {
    match packet.kind()? {
        "descriptor-destroyed" => Some(RdpEvent::DescriptorDestroyed {
            descriptor: packet.from.clone(),
        }),
        _ => None,
    }
}

fn parse_watcher_event(packet: &Packet) -> Option<RdpEvent> {
    match packet.kind()? {
        "target-available-form" => {
            let form = deserialize_field(packet, "target")?;
            Some(RdpEvent::TargetAvailable {
                watcher: packet.from.clone(),
                form,
            })
        }
        "target-destroyed-form" => {
            let target = packet
                .get("target")?
                .get("actor")
                .and_then(Value::as_str)?
                .to_string();
            Some(RdpEvent::TargetDestroyed {
                watcher: packet.from.clone(),
                target,
            })
        }
        _ => None,
    }
}

fn parse_target_event(packet: &Packet) -> Option<RdpEvent> {
    match packet.kind()? {
        "resources-available" => {
            let items = packet.get("resources")?.as_array()?;
            let resources = items.iter().filter_map(parse_resource).collect();
            Some(RdpEvent::Resources {
                target: packet.from.clone(),
                resources,
            })
        }
        "will-navigate" => Some(RdpEvent::WillNavigate {
            target: packet.from.clone(),
            url: packet
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        _ => None,
    }
}

fn parse_resource(item: &Value) -> Option<Resource> {
    let kind = item.get("resourceType").and_then(Value::as_str)?;
    match kind {
        "console-message" => {
            let message = item.get("message")?.clone();
            match serde_json::from_value(message) {
                Ok(message) => Some(Resource::ConsoleMessage(message)),
                Err(e) => {
                    log::warn!(target: "rdp", "bad console-message resource: {e}");
                    None
                }
            }
        }
        "error-message" => {
            let error = item.get("pageError")?.clone();
            match serde_json::from_value(error) {
                Ok(error) => Some(Resource::ErrorMessage(error)),
                Err(e) => {
                    log::warn!(target: "rdp", "bad error-message resource: {e}");
                    None
                }
            }
        }
        "source" => {
            let source = item.get("source")?.clone();
            match serde_json::from_value(source) {
                Ok(source) => Some(Resource::Source(source)),
                Err(e) => {
                    log::warn!(target: "rdp", "bad source resource: {e}");
                    None
                }
            }
        }
        "thread-state" => {
            let state = match item.get("state").and_then(Value::as_str)? {
                "paused" => ThreadStateKind::Paused,
                "resumed" => ThreadStateKind::Resumed,
                other => {
                    log::warn!(target: "rdp", "unknown thread-state `{other}`");
                    return None;
                }
            };
            let why: Option<PauseReason> = item
                .get("why")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok());
            let frame: Option<FrameForm> = item
                .get("frame")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok());
            Some(Resource::ThreadState(ThreadState { state, why, frame }))
        }
        other => {
            log::debug!(target: "rdp", "ignoring resource type `{other}`");
            None
        }
    }
}

fn deserialize_field<T: serde::de::DeserializeOwned>(packet: &Packet, key: &str) -> Option<T> {
    let value = packet.get(key)?.clone();
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!(target: "rdp", "bad `{key}` payload from {}: {e}", packet.from);
            None
        }
    }
}
