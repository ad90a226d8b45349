//! Desired vs realized breakpoints.
//!
//! The editor owns the desired set per source path and resends it whole on
//! every change; the manager diffs against what is realized in the engine,
//! issues installs and removals, and enforces hit limits at stop time.

use crate::dap::protocol::SourceBreakpoint;
use crate::rdp::actors::{BreakpointListActor, BreakpointOptions, BreakpointPosition};
use serde_json::{Value, json};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredBreakpoint {
    pub line: u32,
    pub column: Option<u32>,
    pub condition: Option<String>,
    pub log_message: Option<String>,
    pub hit_limit: Option<u32>,
}

impl DesiredBreakpoint {
    pub fn from_request(bp: &SourceBreakpoint) -> Self {
        let hit_limit = bp.hit_condition.as_deref().and_then(|raw| {
            let digits = raw.trim().trim_start_matches(">=").trim();
            match digits.parse::<u32>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    log::warn!(target: "session", "unusable hit condition `{raw}` ignored");
                    None
                }
            }
        });
        Self {
            line: bp.line,
            column: bp.column,
            condition: bp.condition.clone(),
            log_message: bp.log_message.clone(),
            hit_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealizedBreakpoint {
    pub id: i64,
    pub desired: DesiredBreakpoint,
    pub verified: bool,
    pub actual_line: u32,
    pub actual_column: u32,
    /// The engine itself reported `actual_line`; position-table snapping must
    /// not override it.
    pub engine_located: bool,
    pub hit_count: u32,
    /// URLs this breakpoint is installed under in the engine.
    pub installed_urls: Vec<String>,
}

impl RealizedBreakpoint {
    fn position_for(&self, url: &str) -> BreakpointPosition {
        BreakpointPosition {
            source_url: url.to_string(),
            line: self.desired.line,
            column: self.desired.column.unwrap_or(0),
        }
    }

    fn options(&self) -> BreakpointOptions {
        BreakpointOptions {
            condition: self.desired.condition.clone(),
            log_value: self
                .desired
                .log_message
                .as_deref()
                .map(log_message_to_expression),
        }
    }

    /// DAP `Breakpoint` body.
    pub fn to_dap(&self) -> Value {
        json!({
            "id": self.id,
            "verified": self.verified,
            "line": self.actual_line,
            "column": self.actual_column,
        })
    }
}

pub enum HitDecision {
    Surface,
    Suppress,
}

#[derive(Default)]
pub struct BreakpointManager {
    by_path: HashMap<String, Vec<RealizedBreakpoint>>,
    next_id: i64,
}

impl BreakpointManager {
    /// Replace the desired set for `path`. `urls` are the engine URLs
    /// currently mapped to the path; when empty, the breakpoints stay
    /// unverified until a matching source appears.
    pub async fn set_breakpoints(
        &mut self,
        path: &str,
        desired: Vec<DesiredBreakpoint>,
        urls: &[String],
        list: Option<&BreakpointListActor>,
    ) -> Vec<RealizedBreakpoint> {
        let mut old = self.by_path.remove(path).unwrap_or_default();
        let mut realized = Vec::with_capacity(desired.len());

        for wanted in desired {
            if let Some(index) = old.iter().position(|r| r.desired == wanted) {
                // Unchanged breakpoint: keep its id, hit count and installs.
                realized.push(old.swap_remove(index));
                continue;
            }
            self.next_id += 1;
            let mut bp = RealizedBreakpoint {
                id: self.next_id,
                actual_line: wanted.line,
                actual_column: wanted.column.unwrap_or(0),
                desired: wanted,
                verified: false,
                engine_located: false,
                hit_count: 0,
                installed_urls: Vec::new(),
            };
            if let Some(list) = list {
                for url in urls {
                    install(&mut bp, url, list).await;
                }
            }
            realized.push(bp);
        }

        // Whatever is left in `old` was deleted by the editor.
        if let Some(list) = list {
            for stale in &old {
                for url in &stale.installed_urls {
                    if let Err(e) = list.remove_breakpoint(&stale.position_for(url)).await {
                        log::warn!(target: "session", "breakpoint removal failed: {e:#}");
                    }
                }
            }
        }

        self.by_path.insert(path.to_string(), realized.clone());
        realized
    }

    pub fn has_breakpoints(&self, path: &str) -> bool {
        self.by_path.get(path).is_some_and(|list| !list.is_empty())
    }

    /// A source for `path` appeared under `url`; install anything not yet
    /// realized there and refine reported locations against the source's
    /// breakpoint position table. Returns breakpoints whose verification
    /// state or location changed.
    pub async fn source_appeared(
        &mut self,
        path: &str,
        url: &str,
        list: &BreakpointListActor,
        positions: &[(u32, u32)],
    ) -> Vec<RealizedBreakpoint> {
        let Some(breakpoints) = self.by_path.get_mut(path) else {
            return Vec::new();
        };
        let mut changed = Vec::new();
        for bp in breakpoints.iter_mut() {
            let before = (bp.verified, bp.actual_line);
            if !bp.installed_urls.iter().any(|u| u == url) {
                install(bp, url, list).await;
            }
            if bp.verified
                && !bp.engine_located
                && let Some(snapped) = snap_line(bp.desired.line, positions)
            {
                bp.actual_line = snapped;
            }
            if (bp.verified, bp.actual_line) != before {
                changed.push(bp.clone());
            }
        }
        changed
    }

    /// Consult the hit limit for a stop at `line` of a source identified by
    /// `path` and/or `url`. Counts only breakpoints this manager realized.
    pub fn on_breakpoint_hit(
        &mut self,
        path: Option<&str>,
        url: Option<&str>,
        line: u32,
    ) -> HitDecision {
        let key = match path.filter(|p| self.by_path.contains_key(*p)) {
            Some(p) => Some(p.to_string()),
            None => url.and_then(|url| {
                self.by_path
                    .iter()
                    .find(|(_, list)| {
                        list.iter()
                            .any(|bp| bp.installed_urls.iter().any(|u| u == url))
                    })
                    .map(|(key, _)| key.clone())
            }),
        };
        let Some(breakpoints) = key.and_then(|key| self.by_path.get_mut(&key)) else {
            return HitDecision::Surface;
        };

        let Some(bp) = breakpoints
            .iter_mut()
            .find(|bp| bp.actual_line == line || bp.desired.line == line)
        else {
            return HitDecision::Surface;
        };

        let Some(limit) = bp.desired.hit_limit else {
            return HitDecision::Surface;
        };
        if bp.hit_count < limit {
            bp.hit_count += 1;
        }
        if bp.hit_count < limit {
            HitDecision::Suppress
        } else {
            HitDecision::Surface
        }
    }

    pub fn clear(&mut self) {
        self.by_path.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

async fn install(bp: &mut RealizedBreakpoint, url: &str, list: &BreakpointListActor) {
    match list.set_breakpoint(&bp.position_for(url), &bp.options()).await {
        Ok(actual) => {
            bp.verified = true;
            bp.installed_urls.push(url.to_string());
            if let Some(actual) = actual {
                bp.actual_line = actual.line;
                bp.actual_column = actual.column;
                bp.engine_located = true;
            }
        }
        Err(e) => {
            log::warn!(
                target: "session",
                "breakpoint {}:{} not installed: {e:#}", url, bp.desired.line
            );
        }
    }
}

/// The nearest position at or after `line` that can hold a breakpoint.
/// `None` when the table already allows `line` or has nothing after it.
fn snap_line(line: u32, positions: &[(u32, u32)]) -> Option<u32> {
    if positions.is_empty() || positions.iter().any(|(l, _)| *l == line) {
        return None;
    }
    positions.iter().map(|(l, _)| *l).filter(|l| *l > line).min()
}

/// Turn a DAP log message into the template-literal expression the engine
/// evaluates for native logpoints: `count {i}` becomes `` `count ${i}` ``.
pub fn log_message_to_expression(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 2);
    out.push('`');
    let mut chars = message.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => out.push_str("${"),
            '`' => out.push_str("\\`"),
            '\\' => out.push_str("\\\\"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            other => out.push(other),
        }
    }
    out.push('`');
    out
}
