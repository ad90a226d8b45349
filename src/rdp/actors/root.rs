//! The root actor: entry point of every connection.

use crate::error::Result;
use crate::rdp::actors::{ActorProxy, decode_field};
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use crate::rdp::forms::{DescriptorForm, RootForm};
use serde_json::json;
use std::rc::Rc;

#[derive(Clone)]
pub struct RootActor {
    proxy: Rc<ActorProxy>,
}

impl RootActor {
    pub const NAME: &'static str = "root";

    pub fn new(conn: &Rc<Connection>) -> Self {
        Self {
            proxy: conn.get_or_create(Self::NAME, ActorCategory::Root),
        }
    }

    /// Enumerate the global sub-actors (preference, addons, device).
    /// Idempotent on the server; memoized here.
    pub async fn get_root(&self) -> Result<RootForm> {
        let response = self
            .proxy
            .request_cached("getRoot", "getRoot", json!({}))
            .await?;
        crate::rdp::actors::decode_body(response, Self::NAME)
    }

    /// Descriptor of the parent process (modern discovery mode).
    pub async fn get_process(&self) -> Result<DescriptorForm> {
        let response = self.proxy.request("getProcess", json!({ "id": 0 })).await?;
        decode_field(&response, "processDescriptor", Self::NAME)
    }

    /// Enumerate tab descriptors (legacy discovery mode).
    pub async fn list_tabs(&self) -> Result<Vec<DescriptorForm>> {
        let response = self.proxy.request("listTabs", json!({})).await?;
        decode_field(&response, "tabs", Self::NAME)
    }
}
