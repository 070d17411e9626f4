//! Probe tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Body previews are cut at this many characters, marker appended.
    pub body_preview_limit: usize,
    /// Stack frames retained per capture, counted after filtering.
    pub max_stack_frames: usize,
    /// Markers identifying the probe's own wrapper frames in traces.
    pub internal_markers: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            body_preview_limit: 10_000,
            max_stack_frames: 10,
            internal_markers: vec!["__webtap".to_string()],
        }
    }
}
