//! DAP message envelopes and the outbound writer.
//!
//! The envelopes are hand-rolled serde mirrors of the protocol JSON; the
//! bridge emits custom events (`newSource`, `threadStarted`, `threadExited`)
//! that no closed event enum carries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// DAP request envelope.
#[derive(Debug, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// DAP response envelope.
///
/// Note: the DAP specification allows responses with no `body` field at all.
/// Using a `serde_json::Value` keeps the envelope stable and avoids type
/// inference issues around `None` bodies.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Outbound message before sequencing. The writer task assigns `seq` so that
/// emission order and sequence order agree.
#[derive(Debug)]
pub enum Outbound {
    Response {
        request_seq: i64,
        command: String,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    },
    Event {
        event: String,
        body: Option<Value>,
    },
}

/// Cheap-to-clone handle used by every part of the session that produces DAP
/// traffic. Dropping all emitters ends the writer task.
#[derive(Clone)]
pub struct DapEmitter {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl DapEmitter {
    pub fn new() -> (DapEmitter, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DapEmitter { tx }, rx)
    }

    pub fn respond_success(&self, req: &DapRequest, body: Option<Value>) {
        log::debug!(target: "dap", "success {}: {}", req.seq, req.command);
        let _ = self.tx.send(Outbound::Response {
            request_seq: req.seq,
            command: req.command.clone(),
            success: true,
            message: None,
            body,
        });
    }

    pub fn respond_error(&self, req: &DapRequest, message: impl ToString) {
        let message = message.to_string();
        log::debug!(target: "dap", "error {}: {message}", req.seq);
        let _ = self.tx.send(Outbound::Response {
            request_seq: req.seq,
            command: req.command.clone(),
            success: false,
            message: Some(message),
            body: None,
        });
    }

    pub fn send_event(&self, event: &str, body: Option<Value>) {
        log::debug!(target: "dap", "event {event}");
        let _ = self.tx.send(Outbound::Event {
            event: event.to_string(),
            body,
        });
    }
}

// ------------------------------- request arguments -------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub source_reference: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub log_message: Option<String>,
    #[serde(default)]
    pub hit_condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: SourceRef,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExceptionBreakpointsArguments {
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadIdArguments {
    pub thread_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    #[serde(default)]
    pub start_frame: Option<u32>,
    #[serde(default)]
    pub levels: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(default)]
    pub frame_id: Option<i64>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    #[serde(default)]
    pub source: Option<SourceRef>,
    #[serde(default)]
    pub source_reference: i64,
}
