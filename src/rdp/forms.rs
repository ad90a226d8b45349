//! Wire forms of the remote debugging protocol.
//!
//! Server actors describe themselves and their values with JSON "forms".
//! Everything here is a plain serde mirror of those shapes; semantics live in
//! the session layer.

use serde::Deserialize;
use serde_json::Value;

/// Traits advertised by the root actor in its `init` hello packet.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RootTraits {
    pub web_extension_addon_connect: bool,
    pub native_logpoints: bool,
    pub supports_enable_window_global_thread_actors: bool,
}

/// Sub-actors enumerated by `getRoot`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RootForm {
    pub preference_actor: Option<String>,
    pub addons_actor: Option<String>,
    pub device_actor: Option<String>,
}

/// A debuggable scope: a tab, the parent process or a web extension.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorForm {
    pub actor: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Traits advertised by a watcher actor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherTraits {
    pub content_script: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherForm {
    pub actor: String,
    #[serde(default)]
    pub traits: WatcherTraits,
}

/// A concrete execution context under a descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetForm {
    pub actor: String,
    /// `frame`, `worker`, `content_script`, ...
    pub target_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub addon_id: Option<String>,
    /// Window this target renders into; relates iframes to their tab.
    #[serde(default)]
    pub browsing_context_id: Option<u64>,
    /// Placeholder documents the extension machinery loads into empty hosts.
    #[serde(default)]
    pub is_fallback_document: bool,
    pub thread_actor: String,
    pub console_actor: String,
}

/// A source actor announcement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceForm {
    pub actor: String,
    #[serde(default)]
    pub url: Option<String>,
    /// URL of the generated file when this form describes an original source.
    #[serde(default)]
    pub generated_url: Option<String>,
    #[serde(default)]
    pub source_map_url: Option<String>,
    /// `scriptElement`, `eval`, `debugger eval`, ...
    #[serde(default)]
    pub introduction_type: Option<String>,
    #[serde(default)]
    pub is_black_boxed: bool,
}

impl SourceForm {
    /// Debugger-eval sources never correspond to user files.
    pub fn is_debugger_eval(&self) -> bool {
        matches!(self.introduction_type.as_deref(), Some("debugger eval"))
    }
}

/// Position inside a source actor.
#[derive(Debug, Clone, Deserialize)]
pub struct WireLocation {
    /// Source actor name.
    pub actor: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// One frame of a paused thread's stack.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameForm {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(rename = "where")]
    pub location: WireLocation,
    #[serde(default)]
    pub this: Option<Value>,
    /// Lexical environment of the frame; scopes and variables read it.
    #[serde(default)]
    pub environment: Option<Value>,
}

/// Why a thread paused.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseReason {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub exception: Option<Grip>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadStateKind {
    Paused,
    Resumed,
}

/// `thread-state` resource payload.
#[derive(Debug, Clone)]
pub struct ThreadState {
    pub state: ThreadStateKind,
    pub why: Option<PauseReason>,
    pub frame: Option<FrameForm>,
}

/// A server-side reference to a live value.
///
/// Primitive values arrive inline; objects and overlong strings arrive as
/// actor-bearing descriptors. The session decides what to expand, so the raw
/// JSON is kept and interrogated through accessors.
#[derive(Debug, Clone, Deserialize)]
pub struct Grip(pub Value);

impl Grip {
    fn type_tag(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn actor(&self) -> Option<&str> {
        self.0.get("actor").and_then(Value::as_str)
    }

    pub fn is_object(&self) -> bool {
        self.type_tag() == Some("object")
    }

    pub fn is_long_string(&self) -> bool {
        self.type_tag() == Some("longString")
    }

    pub fn class(&self) -> Option<&str> {
        self.0.get("class").and_then(Value::as_str)
    }

    /// Grip lifetime tag; pause-lifetime grips die on resume.
    pub fn is_thread_lifetime(&self) -> bool {
        self.0.get("threadLifetime").and_then(Value::as_bool) == Some(true)
    }

    /// Human-readable exception text, preferring the object preview.
    pub fn exception_text(&self) -> String {
        if let Some(preview) = self.0.get("preview") {
            let class = preview
                .get("kind")
                .and_then(Value::as_str)
                .filter(|k| *k == "Error")
                .and_then(|_| preview.get("name").and_then(Value::as_str))
                .or_else(|| self.class());
            let message = preview.get("message").and_then(Value::as_str);
            match (class, message) {
                (Some(class), Some(message)) => return format!("{class}: {message}"),
                (None, Some(message)) => return message.to_string(),
                (Some(class), None) => return class.to_string(),
                (None, None) => {}
            }
        }
        self.display()
    }

    /// Render a grip the way a console would print the value.
    pub fn display(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            obj @ Value::Object(_) => {
                if self.is_long_string() {
                    return obj
                        .get("initial")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                }
                match self.type_tag() {
                    Some("undefined") => "undefined".to_string(),
                    Some("null") => "null".to_string(),
                    Some("NaN") => "NaN".to_string(),
                    Some("Infinity") => "Infinity".to_string(),
                    Some("-Infinity") => "-Infinity".to_string(),
                    Some("-0") => "-0".to_string(),
                    Some("BigInt") => {
                        let text = obj.get("text").and_then(Value::as_str).unwrap_or("?");
                        format!("{text}n")
                    }
                    _ => self.class().unwrap_or("Object").to_string(),
                }
            }
            other => other.to_string(),
        }
    }

    /// True when expanding this grip requires further server requests.
    pub fn is_expandable(&self) -> bool {
        (self.is_object() || self.is_long_string()) && self.actor().is_some()
    }
}

/// One console API call delivered as a `console-message` resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    /// `log`, `info`, `warn`, `error`, `debug`, `assert`, `time`, `timeEnd`,
    /// `group`, `groupEnd`, `clear`, ...
    pub level: String,
    #[serde(default)]
    pub arguments: Vec<Grip>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub column_number: Option<u32>,
    #[serde(default)]
    pub timer: Option<TimerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerInfo {
    pub name: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// An uncaught page error delivered as an `error-message` resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(default)]
    pub error_message: Option<Grip>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub column_number: Option<u32>,
}

/// A breakpoint location as the breakpoint-list actor addresses it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedLocation {
    pub source_url: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grip_primitives_display() {
        assert_eq!(Grip(json!("hi")).display(), "hi");
        assert_eq!(Grip(json!(42)).display(), "42");
        assert_eq!(Grip(json!(null)).display(), "null");
        assert_eq!(Grip(json!({"type": "undefined"})).display(), "undefined");
        assert_eq!(
            Grip(json!({"type": "BigInt", "text": "9007199254740993"})).display(),
            "9007199254740993n"
        );
    }

    #[test]
    fn grip_exception_text_prefers_preview() {
        let grip = Grip(json!({
            "type": "object",
            "class": "Error",
            "actor": "server1.obj12",
            "preview": {"kind": "Error", "name": "TypeError", "message": "x is not a function"},
        }));
        assert_eq!(grip.exception_text(), "TypeError: x is not a function");
        assert!(grip.is_expandable());
    }

    #[test]
    fn long_string_grip() {
        let grip = Grip(json!({
            "type": "longString",
            "actor": "server1.ls3",
            "length": 100000,
            "initial": "begin...",
        }));
        assert!(grip.is_long_string());
        assert!(!grip.is_object());
        assert_eq!(grip.display(), "begin...");
    }

    #[test]
    fn source_form_debugger_eval() {
        let form: SourceForm = serde_json::from_value(json!({
            "actor": "server1.source4",
            "introductionType": "debugger eval",
        }))
        .unwrap();
        assert!(form.is_debugger_eval());
        assert!(form.url.is_none());
    }
}
