//! Proxies for value grips: objects and overlong strings.

use crate::error::Result;
use crate::rdp::actors::ActorProxy;
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use crate::rdp::forms::Grip;
use serde_json::{Value, json};
use std::rc::Rc;

pub struct ObjectGripActor {
    proxy: Rc<ActorProxy>,
}

impl ObjectGripActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::ObjectGrip),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Own properties of the object, each a grip.
    pub async fn prototype_and_properties(&self) -> Result<Vec<(String, Grip)>> {
        let response = self
            .proxy
            .request("prototypeAndProperties", json!({}))
            .await?;
        let mut properties = Vec::new();
        if let Some(Value::Object(own)) = response.get("ownProperties") {
            for (name, descriptor) in own {
                let value = descriptor
                    .get("value")
                    .cloned()
                    .unwrap_or(Value::Object(serde_json::Map::new()));
                properties.push((name.clone(), Grip(value)));
            }
        }
        Ok(properties)
    }

    /// Drop the server-side reference for a thread-lifetime grip.
    pub async fn release(&self) -> Result<()> {
        self.proxy.request("release", json!({})).await?;
        Ok(())
    }
}

pub struct LongStringActor {
    proxy: Rc<ActorProxy>,
}

impl LongStringActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::LongString),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    pub async fn substring(&self, start: u64, end: u64) -> Result<String> {
        let response = self
            .proxy
            .request("substring", json!({ "start": start, "end": end }))
            .await?;
        response
            .get("substring")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| crate::error::Error::UnexpectedResponse(self.proxy.name().to_string()))
    }

    pub async fn release(&self) -> Result<()> {
        self.proxy.request("release", json!({})).await?;
        Ok(())
    }
}
