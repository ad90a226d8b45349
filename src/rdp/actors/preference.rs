//! The preference actor reads and writes browser preferences.

use crate::error::Result;
use crate::rdp::actors::ActorProxy;
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use serde_json::{Value, json};
use std::rc::Rc;

pub struct PreferenceActor {
    proxy: Rc<ActorProxy>,
}

impl PreferenceActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::Preference),
        }
    }

    pub async fn get_bool(&self, pref: &str) -> Result<bool> {
        let response = self
            .proxy
            .request("getBoolPref", json!({ "value": pref }))
            .await?;
        Ok(response
            .get("value")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    pub async fn set_bool(&self, pref: &str, value: bool) -> Result<()> {
        self.proxy
            .request("setBoolPref", json!({ "name": pref, "value": value }))
            .await?;
        Ok(())
    }
}
