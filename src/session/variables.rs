//! Variable reference providers.
//!
//! Every number handed to the editor as `variablesReference` indexes a
//! provider here. Scope and pause-lifetime grip providers die on resume;
//! thread-lifetime grips die with their thread.

use crate::rdp::forms::Grip;
use crate::session::registry::Registry;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLifetime {
    Pause,
    Thread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Arguments,
    Locals,
}

pub enum Provider {
    /// A frame scope backed by the pause frame's environment bindings.
    Bindings {
        thread_id: i64,
        kind: ScopeKind,
        environment: Value,
    },
    Object {
        thread_id: i64,
        lifetime: VariableLifetime,
        actor: String,
    },
    LongString {
        thread_id: i64,
        lifetime: VariableLifetime,
        actor: String,
        length: u64,
    },
}

impl Provider {
    fn thread_id(&self) -> i64 {
        match self {
            Provider::Bindings { thread_id, .. }
            | Provider::Object { thread_id, .. }
            | Provider::LongString { thread_id, .. } => *thread_id,
        }
    }

    fn is_pause_lifetime(&self) -> bool {
        match self {
            Provider::Bindings { .. } => true,
            Provider::Object { lifetime, .. } | Provider::LongString { lifetime, .. } => {
                *lifetime == VariableLifetime::Pause
            }
        }
    }
}

#[derive(Default)]
pub struct VariablesStore {
    registry: Registry<Provider>,
}

impl VariablesStore {
    pub fn alloc(&mut self, provider: Provider) -> i64 {
        self.registry.add(provider)
    }

    pub fn get(&self, reference: i64) -> Option<&Provider> {
        self.registry.get(reference)
    }

    /// Dispose every pause-lifetime provider of `thread_id`. Must complete
    /// before the thread's `continued` event is emitted.
    pub fn invalidate_pause(&mut self, thread_id: i64) -> Vec<i64> {
        self.registry
            .remove_where(|p| p.thread_id() == thread_id && p.is_pause_lifetime())
    }

    /// Remove every provider of `thread_id`. Thread-lifetime grips are handed
    /// back so the caller can release their server-side references; the
    /// engine frees pause-lifetime grips itself on resume.
    pub fn dispose_thread(&mut self, thread_id: i64) -> Vec<Provider> {
        self.registry
            .take_where(|p| p.thread_id() == thread_id)
            .into_iter()
            .filter(|p| {
                matches!(
                    p,
                    Provider::Object {
                        lifetime: VariableLifetime::Thread,
                        ..
                    } | Provider::LongString {
                        lifetime: VariableLifetime::Thread,
                        ..
                    }
                )
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.registry.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

/// Pull named grips out of a frame's environment bindings.
pub fn bindings_variables(environment: &Value, kind: ScopeKind) -> Vec<(String, Grip)> {
    let Some(bindings) = environment.get("bindings") else {
        return Vec::new();
    };
    match kind {
        ScopeKind::Arguments => {
            let Some(arguments) = bindings.get("arguments").and_then(Value::as_array) else {
                return Vec::new();
            };
            arguments
                .iter()
                .filter_map(|entry| entry.as_object())
                .flat_map(|entry| entry.iter())
                .map(|(name, descriptor)| (name.clone(), descriptor_grip(descriptor)))
                .collect()
        }
        ScopeKind::Locals => {
            let Some(variables) = bindings.get("variables").and_then(Value::as_object) else {
                return Vec::new();
            };
            variables
                .iter()
                .map(|(name, descriptor)| (name.clone(), descriptor_grip(descriptor)))
                .collect()
        }
    }
}

/// Whether a frame environment carries any argument bindings.
pub fn has_arguments(environment: &Value) -> bool {
    environment
        .get("bindings")
        .and_then(|b| b.get("arguments"))
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false)
}

fn descriptor_grip(descriptor: &Value) -> Grip {
    match descriptor.get("value") {
        Some(value) => Grip(value.clone()),
        None => Grip(Value::Object(Map::new())),
    }
}

/// DAP `Variable` body for one named grip.
pub fn variable_json(name: &str, grip: &Grip, reference: i64) -> Value {
    let mut body = json!({
        "name": name,
        "value": grip.display(),
        "variablesReference": reference,
    });
    if let Some(class) = grip.class() {
        body["type"] = Value::String(class.to_string());
    }
    body
}
