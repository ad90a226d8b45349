//! Descriptor actors front debuggable scopes: tabs, processes, extensions.

use crate::error::Result;
use crate::rdp::actors::{ActorProxy, decode_body};
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use crate::rdp::forms::WatcherForm;
use serde_json::json;
use std::rc::Rc;

#[derive(Clone)]
pub struct DescriptorActor {
    proxy: Rc<ActorProxy>,
}

impl DescriptorActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::Descriptor),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Each descriptor owns exactly one watcher; the query is immutable.
    pub async fn get_watcher(&self) -> Result<WatcherForm> {
        let response = self
            .proxy
            .request_cached("getWatcher", "getWatcher", json!({}))
            .await?;
        decode_body(response, self.proxy.name())
    }

    /// Reload the descriptor's document.
    pub async fn reload(&self) -> Result<()> {
        self.proxy.request("reloadDescriptor", json!({})).await?;
        Ok(())
    }
}
