//! The addons actor installs temporary web extensions.

use crate::error::Result;
use crate::rdp::actors::ActorProxy;
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use serde_json::{Value, json};
use std::rc::Rc;

pub struct AddonsActor {
    proxy: Rc<ActorProxy>,
}

impl AddonsActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::Addons),
        }
    }

    /// Install an unpacked extension from `path`. Returns the addon id.
    pub async fn install_temporary_addon(&self, path: &str) -> Result<String> {
        let response = self
            .proxy
            .request("installTemporaryAddon", json!({ "addonPath": path }))
            .await?;
        response
            .get("addon")
            .and_then(|a| a.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| crate::error::Error::UnexpectedResponse(self.proxy.name().to_string()))
    }
}
