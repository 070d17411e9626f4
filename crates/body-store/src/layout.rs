//! Path layout: `root/<session>/<sanitized-id>.<direction>.body`.

use std::path::{Path, PathBuf};

use webtap_core_types::{BodyDirection, RequestId};

const BODY_EXT: &str = "body";

pub(crate) fn body_path(session_dir: &Path, id: &RequestId, direction: BodyDirection) -> PathBuf {
    session_dir.join(format!(
        "{}.{}.{}",
        sanitize_id(&id.0),
        direction.as_str(),
        BODY_EXT
    ))
}

/// Correlation ids come off the wire; keep only characters every
/// filesystem accepts.
pub(crate) fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
