//! Target actors front concrete execution contexts (documents, workers,
//! content scripts). Resources for the target's thread and console arrive
//! through this actor as events.

use crate::error::Result;
use crate::rdp::actors::ActorProxy;
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;

pub struct TargetActor {
    proxy: Rc<ActorProxy>,
    destroyed: Cell<bool>,
}

impl TargetActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::Target),
            destroyed: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Set when the engine destroys this target; requests to a destroyed
    /// target are pointless and skipped by callers.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn mark_destroyed(&self) {
        self.destroyed.set(true);
    }

    pub async fn detach(&self) -> Result<()> {
        self.proxy.request("detach", json!({})).await?;
        Ok(())
    }

    /// Reload the document this target renders.
    pub async fn reload(&self) -> Result<()> {
        self.proxy.request("reload", json!({})).await?;
        Ok(())
    }
}
