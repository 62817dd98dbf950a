//! Deployment log line formatting

use std::fmt;

use chrono::{SecondsFormat, Utc};

/// Execution phase, written into the log as a `[stage:<name>]` marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preparing,
    Building,
    Deploying,
    Verifying,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preparing => "preparing",
            Stage::Building => "building",
            Stage::Deploying => "deploying",
            Stage::Verifying => "verifying",
        }
    }

    pub fn marker(&self) -> String {
        format!("[stage:{}]", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current time as the bracketed log prefix, e.g. `[2024-01-01T00:00:00.000Z]`
pub fn timestamp() -> String {
    format!("[{}]", Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Timestamp every line of `message`; the result ends with a newline
pub fn line(message: &str) -> String {
    let ts = timestamp();
    let mut out = String::with_capacity(message.len() + ts.len() + 2);
    for text in message.trim_end_matches('\n').split('\n') {
        out.push_str(&ts);
        out.push(' ');
        out.push_str(text.trim_end_matches('\r'));
        out.push('\n');
    }
    out
}

pub fn stage_line(stage: Stage, message: &str) -> String {
    line(&format!("{} {}", stage.marker(), message))
}

/// Last `max_bytes` of `text`, cut on a char boundary
pub fn tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
