//! Watcher actors broker target discovery and resource subscriptions for one
//! descriptor, plus the session-wide thread configuration and breakpoint list.

use crate::error::Result;
use crate::rdp::actors::{ActorProxy, decode_field};
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use serde_json::json;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Frame,
    Worker,
    ContentScript,
}

impl TargetKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            TargetKind::Frame => "frame",
            TargetKind::Worker => "worker",
            TargetKind::ContentScript => "content_script",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ConsoleMessage,
    ErrorMessage,
    Source,
    ThreadState,
}

impl ResourceKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            ResourceKind::ConsoleMessage => "console-message",
            ResourceKind::ErrorMessage => "error-message",
            ResourceKind::Source => "source",
            ResourceKind::ThreadState => "thread-state",
        }
    }
}

pub struct WatcherActor {
    proxy: Rc<ActorProxy>,
}

impl WatcherActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::Watcher),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Subscribe to targets of one kind. Known targets are announced as
    /// `target-available-form` events before the response arrives.
    pub async fn watch_targets(&self, kind: TargetKind) -> Result<()> {
        self.proxy
            .request("watchTargets", json!({ "targetType": kind.wire_name() }))
            .await?;
        Ok(())
    }

    pub async fn watch_resources(&self, kinds: &[ResourceKind]) -> Result<()> {
        let names: Vec<&str> = kinds.iter().map(|k| k.wire_name()).collect();
        self.proxy
            .request("watchResources", json!({ "resourceTypes": names }))
            .await?;
        Ok(())
    }

    /// Session-wide breakpoint list actor, shared by every thread under this
    /// watcher.
    pub async fn breakpoint_list(&self) -> Result<String> {
        let response = self
            .proxy
            .request_cached(
                "getBreakpointListActor",
                "getBreakpointListActor",
                json!({}),
            )
            .await?;
        let form: ActorOnly = decode_field(&response, "breakpointList", self.proxy.name())?;
        Ok(form.actor)
    }

    /// Session-wide thread configuration actor.
    pub async fn thread_configuration(&self) -> Result<String> {
        let response = self
            .proxy
            .request_cached(
                "getThreadConfigurationActor",
                "getThreadConfigurationActor",
                json!({}),
            )
            .await?;
        let form: ActorOnly = decode_field(&response, "configuration", self.proxy.name())?;
        Ok(form.actor)
    }
}

#[derive(serde::Deserialize)]
struct ActorOnly {
    actor: String,
}

/// Pause-on-exception state shared by every thread the watcher spawns.
#[derive(Clone)]
pub struct ThreadConfigurationActor {
    proxy: Rc<ActorProxy>,
}

impl ThreadConfigurationActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::ThreadConfiguration),
        }
    }

    pub async fn update(
        &self,
        pause_on_exceptions: bool,
        ignore_caught_exceptions: bool,
    ) -> Result<()> {
        self.proxy
            .request(
                "updateConfiguration",
                json!({
                    "configuration": {
                        "pauseOnExceptions": pause_on_exceptions,
                        "ignoreCaughtExceptions": ignore_caught_exceptions,
                    }
                }),
            )
            .await?;
        Ok(())
    }
}
