//! Per-target thread state.
//!
//! Each target the watcher announces becomes one thread adapter with a
//! bridge-assigned id. Pause and resume are driven entirely by `thread-state`
//! resources; the adapter only records where the machine is.

use crate::rdp::actors::{ConsoleActor, TargetActor, ThreadActor};
use crate::rdp::forms::{FrameForm, PauseReason, TargetForm};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseState {
    Running,
    Paused { reason: String },
    Exited,
}

/// One frame prepared for the editor: source-maps applied, source resolved.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    /// Frame registry id; doubles as the DAP frame id.
    pub id: i64,
    pub name: String,
    pub path: Option<String>,
    pub url: Option<String>,
    pub source_id: Option<i64>,
    pub line: u32,
    pub column: u32,
    pub form: FrameForm,
}

pub struct ThreadAdapter {
    pub id: i64,
    pub name: String,
    /// `frame`, `worker`, `content_script`.
    pub kind: String,
    pub target: TargetActor,
    pub thread: ThreadActor,
    pub console: ConsoleActor,
    /// Owning descriptor actor name, when discovered through one.
    pub descriptor: Option<String>,
    pub state: PauseState,
    /// Bumped on every pause; guards late frame prefetch results.
    pub pause_seq: u64,
    /// Stack prepared at the current pause, top first.
    pub frames: Option<Vec<PreparedFrame>>,
    /// Source adapter ids this thread has observed.
    pub sources: Vec<i64>,
}

impl ThreadAdapter {
    pub fn is_paused(&self) -> bool {
        matches!(self.state, PauseState::Paused { .. })
    }

    pub fn has_exited(&self) -> bool {
        self.state == PauseState::Exited
    }

    /// Enter the paused state. Returns the new pause sequence number, or
    /// `None` when the transition is invalid (already exited).
    pub fn on_paused(&mut self, reason: String) -> Option<u64> {
        if self.has_exited() {
            return None;
        }
        self.pause_seq += 1;
        self.state = PauseState::Paused { reason };
        Some(self.pause_seq)
    }

    /// Leave the paused state; the caller disposes pause-lifetime state
    /// first.
    pub fn on_resumed(&mut self) -> bool {
        if !self.is_paused() {
            return false;
        }
        self.state = PauseState::Running;
        self.frames = None;
        true
    }

    pub fn exit(&mut self) {
        self.state = PauseState::Exited;
        self.frames = None;
    }
}

/// Map an engine pause reason onto the DAP `stopped` vocabulary, with the
/// exception text when one is attached.
pub fn classify_stop_reason(why: Option<&PauseReason>) -> (&'static str, Option<String>) {
    let Some(why) = why else {
        return ("interrupt", None);
    };
    match why.kind.as_str() {
        "exception" => {
            let text = why.exception.as_ref().map(|grip| grip.exception_text());
            ("exception", text)
        }
        "breakpoint" => ("breakpoint", None),
        "debuggerStatement" => ("debugger statement", None),
        _ => ("interrupt", None),
    }
}

/// Human-readable thread name shown by the editor.
pub fn thread_display_name(form: &TargetForm, id: i64) -> String {
    let short = form
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| form.url.as_deref().map(url_basename))
        .unwrap_or_default();
    match form.target_type.as_str() {
        "worker" => {
            if short.is_empty() {
                format!("Worker {id}")
            } else {
                format!("Worker: {short}")
            }
        }
        "content_script" => {
            if short.is_empty() {
                format!("Content script {id}")
            } else {
                format!("Content script: {short}")
            }
        }
        _ => {
            if form.addon_id.is_some() {
                format!("Extension: {short}")
            } else if short.is_empty() {
                format!("Tab {id}")
            } else {
                format!("Tab: {short}")
            }
        }
    }
}

fn url_basename(url: &str) -> String {
    let trimmed = crate::session::sources::strip_query(url).trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name.to_string(),
        _ => trimmed.to_string(),
    }
}
