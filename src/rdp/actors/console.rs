//! Console actors evaluate expressions inside a target.

use crate::error::Result;
use crate::rdp::actors::{ActorProxy, decode_body};
use crate::rdp::connection::Connection;
use crate::rdp::event::ActorCategory;
use crate::rdp::forms::Grip;
use serde::Deserialize;
use serde_json::json;
use std::rc::Rc;

/// Outcome of one evaluation. A thrown exception is a result too.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    #[serde(default)]
    pub result: Option<Grip>,
    #[serde(default)]
    pub exception: Option<Grip>,
    #[serde(default)]
    pub exception_message: Option<String>,
}

#[derive(Clone)]
pub struct ConsoleActor {
    proxy: Rc<ActorProxy>,
}

impl ConsoleActor {
    pub fn new(conn: &Rc<Connection>, name: &str) -> Self {
        Self {
            proxy: conn.get_or_create(name, ActorCategory::Console),
        }
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Evaluate `text` in the target's global. The grip in the result is
    /// thread-lifetime; release it when done with it.
    pub async fn evaluate_js(&self, text: &str) -> Result<EvalResult> {
        let response = self
            .proxy
            .request("evaluateJS", json!({ "text": text }))
            .await?;
        decode_body(response, self.proxy.name())
    }
}
