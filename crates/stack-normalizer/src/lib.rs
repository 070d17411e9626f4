//! Raw engine stack text to structured frames.
//!
//! Script engines disagree on trace syntax. One family prints
//! `    at name (file:line:col)` with an `Error` preamble line, the other
//! prints `name@file:line:col` with an empty name for anonymous frames. The
//! normalizer runs an ordered strategy list per line, absolutizes relative
//! file references against the document base, drops the observer's own
//! wrapper frames and caps the result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// One parsed call site. `function` is `None` for anonymous frames.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Frames retained per trace when the caller does not override it.
pub const DEFAULT_MAX_FRAMES: usize = 10;

/// Tuning for [`normalize`].
#[derive(Clone, Debug)]
pub struct NormalizeOptions {
    /// Keep at most this many frames, counted after filtering.
    pub max_frames: usize,
    /// A frame whose function or file contains one of these markers belongs
    /// to the observer itself and is dropped.
    pub internal_markers: Vec<String>,
    /// Document base used to absolutize relative file references.
    pub base: Option<Url>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            internal_markers: vec!["__webtap".to_string()],
            base: None,
        }
    }
}

// Ordered most specific first; the first pattern matching a line wins.
static PAREN_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*at\s+(?:async\s+)?(.+?)\s+\((.+?):(\d+):(\d+)\)\s*$").unwrap()
});
static PAREN_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*at\s+(?:async\s+)?(.+?):(\d+):(\d+)\s*$").unwrap());
static SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(.*?)@(.+?):(\d+):(\d+)\s*$").unwrap());

/// Parse raw trace text into at most `options.max_frames` frames, original
/// order preserved. Lines matching no known dialect are skipped, never an
/// error.
pub fn normalize(raw: &str, options: &NormalizeOptions) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    for line in raw.lines() {
        if frames.len() >= options.max_frames {
            break;
        }
        let Some(mut frame) = parse_line(line) else {
            continue;
        };
        resolve_file(&mut frame, options.base.as_ref());
        if is_internal(&frame, &options.internal_markers) {
            continue;
        }
        frames.push(frame);
    }
    frames
}

fn parse_line(line: &str) -> Option<StackFrame> {
    if let Some(caps) = PAREN_NAMED.captures(line) {
        return build_frame(Some(&caps[1]), &caps[2], &caps[3], &caps[4]);
    }
    if let Some(caps) = PAREN_BARE.captures(line) {
        return build_frame(None, &caps[1], &caps[2], &caps[3]);
    }
    if let Some(caps) = SEPARATOR.captures(line) {
        let function = Some(caps[1].trim()).filter(|name| !name.is_empty());
        return build_frame(function, &caps[2], &caps[3], &caps[4]);
    }
    None
}

fn build_frame(function: Option<&str>, file: &str, line: &str, column: &str) -> Option<StackFrame> {
    let line = line.parse().ok()?;
    let column = column.parse().ok()?;
    Some(StackFrame {
        function: function.map(|name| name.trim().to_string()),
        file: file.to_string(),
        line,
        column,
    })
}

fn resolve_file(frame: &mut StackFrame, base: Option<&Url>) {
    if Url::parse(&frame.file).is_ok() {
        return;
    }
    if let Some(base) = base {
        if let Ok(resolved) = base.join(&frame.file) {
            frame.file = resolved.to_string();
        }
    }
}

fn is_internal(frame: &StackFrame, markers: &[String]) -> bool {
    markers.iter().any(|marker| {
        frame.file.contains(marker.as_str())
            || frame
                .function
                .as_deref()
                .map_or(false, |name| name.contains(marker.as_str()))
    })
}
