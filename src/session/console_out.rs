//! Console message mediation.
//!
//! `console-message` resources become DAP `output` events. The formatter owns
//! the little bit of state the console API implies: group indentation.

use crate::rdp::forms::{ConsoleMessage, Grip};

#[derive(Debug, PartialEq, Eq)]
pub struct ConsoleOutput {
    /// DAP output category: `stdout`, `stderr` or `console`.
    pub category: &'static str,
    pub text: String,
    /// `(url-or-path, line, column)` of the call site.
    pub location: Option<(String, u32, u32)>,
}

pub struct ConsoleFormatter {
    group_depth: usize,
    show_call_location: bool,
}

impl ConsoleFormatter {
    pub fn new(show_call_location: bool) -> Self {
        Self {
            group_depth: 0,
            show_call_location,
        }
    }

    /// Reset grouping, e.g. when the page reloads.
    pub fn reset(&mut self) {
        self.group_depth = 0;
    }

    /// Format one message. `None` means the message produces no output
    /// (`console.time`, `groupEnd`, `clear`).
    pub fn format(&mut self, message: &ConsoleMessage) -> Option<ConsoleOutput> {
        let (category, text) = match message.level.as_str() {
            "time" | "clear" => return None,
            "groupEnd" => {
                self.group_depth = self.group_depth.saturating_sub(1);
                return None;
            }
            "timeEnd" => {
                let timer = message.timer.as_ref()?;
                let duration = timer.duration.unwrap_or(0.0);
                (
                    "stdout",
                    format!("{}: {}ms - timer ended", timer.name, duration),
                )
            }
            "group" | "groupCollapsed" => {
                let label = arguments_text(&message.arguments);
                let text = if label.is_empty() {
                    "group".to_string()
                } else {
                    label
                };
                self.group_depth += 1;
                ("stdout", text)
            }
            "assert" => (
                "stderr",
                format!("Assertion failed: {}", arguments_text(&message.arguments)),
            ),
            "error" | "exception" => ("stderr", arguments_text(&message.arguments)),
            "warn" | "debug" => ("console", arguments_text(&message.arguments)),
            _ => ("stdout", arguments_text(&message.arguments)),
        };

        let indent_depth = if matches!(message.level.as_str(), "group" | "groupCollapsed") {
            self.group_depth - 1
        } else {
            self.group_depth
        };
        let mut line = "  ".repeat(indent_depth);
        line.push_str(&text);
        line.push('\n');

        let location = if self.show_call_location {
            message
                .filename
                .as_ref()
                .map(|file| {
                    (
                        file.clone(),
                        message.line_number.unwrap_or(1),
                        message.column_number.unwrap_or(0),
                    )
                })
        } else {
            None
        };

        Some(ConsoleOutput {
            category,
            text: line,
            location,
        })
    }
}

fn arguments_text(arguments: &[Grip]) -> String {
    arguments
        .iter()
        .map(Grip::display)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A lone object argument is worth expanding in the editor.
pub fn expandable_argument(message: &ConsoleMessage) -> Option<&Grip> {
    match message.arguments.as_slice() {
        [single] if single.is_expandable() => Some(single),
        _ => None,
    }
}
