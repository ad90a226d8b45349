//! The session-wide breakpoint list actor. Locations are URL-addressed; the
//! engine binds them to whichever sources match, now or later.

use crate::error::Result;
use crate::rdp::actors::ActorProxy;
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use crate::rdp::forms::RealizedLocation;
use serde_json::{Map, Value, json};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointPosition {
    pub source_url: String,
    pub line: u32,
    pub column: u32,
}

impl BreakpointPosition {
    fn wire(&self) -> Value {
        json!({
            "sourceUrl": self.source_url,
            "line": self.line,
            "column": self.column,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BreakpointOptions {
    pub condition: Option<String>,
    /// Turns the breakpoint into a logpoint; requires the `nativeLogpoints`
    /// trait.
    pub log_value: Option<String>,
}

impl BreakpointOptions {
    fn wire(&self) -> Value {
        let mut map = Map::new();
        if let Some(condition) = &self.condition {
            map.insert("condition".to_string(), Value::String(condition.clone()));
        }
        if let Some(log_value) = &self.log_value {
            map.insert("logValue".to_string(), Value::String(log_value.clone()));
        }
        Value::Object(map)
    }
}

#[derive(Clone)]
pub struct BreakpointListActor {
    proxy: Rc<ActorProxy>,
}

impl BreakpointListActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::BreakpointList),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Install a breakpoint. The engine answers with the position it actually
    /// bound to when that differs from the request.
    pub async fn set_breakpoint(
        &self,
        position: &BreakpointPosition,
        options: &BreakpointOptions,
    ) -> Result<Option<RealizedLocation>> {
        let response = self
            .proxy
            .request(
                "setBreakpoint",
                json!({ "location": position.wire(), "options": options.wire() }),
            )
            .await?;
        let actual = response
            .get("actualLocation")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        Ok(actual)
    }

    pub async fn remove_breakpoint(&self, position: &BreakpointPosition) -> Result<()> {
        self.proxy
            .request("removeBreakpoint", json!({ "location": position.wire() }))
            .await?;
        Ok(())
    }
}
