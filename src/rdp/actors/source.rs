//! Source actors: one per script the engine has seen.

use crate::error::Result;
use crate::rdp::actors::ActorProxy;
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use crate::rdp::forms::Grip;
use serde_json::{Value, json};
use std::rc::Rc;

/// Script text, either inline or as a long-string grip to page through.
#[derive(Debug, Clone)]
pub enum SourceContent {
    Text(String),
    LongString(Grip),
}

#[derive(Clone)]
pub struct SourceActor {
    proxy: Rc<ActorProxy>,
}

impl SourceActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::Source),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Flip the engine-level blackbox flag for this source.
    pub async fn set_blackbox(&self, blackbox: bool) -> Result<()> {
        let kind = if blackbox { "blackbox" } else { "unblackbox" };
        self.proxy.request(kind, json!({})).await?;
        Ok(())
    }

    /// Positions at which breakpoints can bind inside this source.
    pub async fn breakpoint_positions(&self) -> Result<Vec<(u32, u32)>> {
        let response = self
            .proxy
            .request("getBreakpointPositions", json!({}))
            .await?;
        let mut positions = Vec::new();
        if let Some(items) = response.get("positions").and_then(Value::as_array) {
            for item in items {
                let line = item.get("line").and_then(Value::as_u64);
                let column = item.get("column").and_then(Value::as_u64);
                if let (Some(line), Some(column)) = (line, column) {
                    positions.push((line as u32, column as u32));
                }
            }
        }
        Ok(positions)
    }

    pub async fn pretty_print(&self) -> Result<()> {
        self.proxy
            .request("prettyPrint", json!({ "indent": 2 }))
            .await?;
        Ok(())
    }

    /// Load the script text.
    pub async fn load(&self) -> Result<SourceContent> {
        let response = self.proxy.request("source", json!({})).await?;
        match response.get("source") {
            Some(Value::String(text)) => Ok(SourceContent::Text(text.clone())),
            Some(obj @ Value::Object(_)) => Ok(SourceContent::LongString(Grip(obj.clone()))),
            _ => Err(crate::error::Error::UnexpectedResponse(
                self.proxy.name().to_string(),
            )),
        }
    }
}
