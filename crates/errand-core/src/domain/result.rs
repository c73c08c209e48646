//! TaskResult: immutable record of one executor invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{RunId, TaskId};

/// Text produced by the executor.
///
/// The executor drives a real browser, so its output is untrusted. `Display`
/// writes the HTML-escaped form; `as_raw()` must only reach sinks that do
/// their own escaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UntrustedText(String);

impl UntrustedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_raw(&self) -> &str {
        &self.0
    }

    pub fn to_html_escaped(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for c in self.0.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#x27;"),
                _ => out.push(c),
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UntrustedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_html_escaped())
    }
}

/// One recorded executor output, keyed by task id (not by object identity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub run_id: RunId,
    /// Global, strictly increasing across all results.
    pub sequence_index: u64,
    pub succeeded: bool,
    pub payload: UntrustedText,
    pub recorded_at: DateTime<Utc>,
}
