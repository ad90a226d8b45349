//! Thread actors control execution of one target.
//!
//! In the modern trait mode there is no explicit attach; pause and resume are
//! observed through the target's `thread-state` resources, so this veneer is
//! pure request/response.

use crate::error::Result;
use crate::rdp::actors::{ActorProxy, decode_field};
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use crate::rdp::forms::FrameForm;
use serde_json::json;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Step over.
    Next,
    /// Step into.
    Step,
    /// Step out.
    Finish,
}

impl StepKind {
    fn wire_name(self) -> &'static str {
        match self {
            StepKind::Next => "next",
            StepKind::Step => "step",
            StepKind::Finish => "finish",
        }
    }
}

#[derive(Clone)]
pub struct ThreadActor {
    proxy: Rc<ActorProxy>,
}

impl ThreadActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::Thread),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    pub async fn resume(&self) -> Result<()> {
        self.proxy.request("resume", json!({})).await?;
        Ok(())
    }

    pub async fn step(&self, kind: StepKind) -> Result<()> {
        self.proxy
            .request(
                "resume",
                json!({ "resumeLimit": { "type": kind.wire_name() } }),
            )
            .await?;
        Ok(())
    }

    pub async fn interrupt(&self) -> Result<()> {
        self.proxy.request("interrupt", json!({})).await?;
        Ok(())
    }

    /// Fetch a slice of the paused stack, top first.
    pub async fn frames(&self, start: u32, count: u32) -> Result<Vec<FrameForm>> {
        let response = self
            .proxy
            .request("frames", json!({ "start": start, "count": count }))
            .await?;
        decode_field(&response, "frames", self.proxy.name())
    }
}
