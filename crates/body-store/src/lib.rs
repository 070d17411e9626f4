//! Disk tier for captured bodies.
//!
//! Records only ever carry a bounded preview; the full payload for each
//! `(request, direction)` pair lands here, one file per body under a
//! per-session directory. Writes are fire-and-forget through a
//! background thread, reads treat any failure as absence, and opening a
//! fresh store sweeps earlier sessions unless asked to preserve them.

mod layout;
mod writer;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use webtap_core_types::{BodyDirection, BodySink, RequestId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory holding one subdirectory per session.
    pub root: PathBuf,
    /// Keep directories left by earlier sessions instead of sweeping
    /// them at open.
    pub preserve_across_sessions: bool,
    /// Master switch; when off, `store` is a no-op and reads find
    /// nothing.
    pub capture_bodies: bool,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            preserve_across_sessions: false,
            capture_bodies: true,
        }
    }
}

pub struct BodyStore {
    root: PathBuf,
    session_dir: PathBuf,
    capture_bodies: bool,
    writer: writer::WriterHandle,
}

impl BodyStore {
    /// Opens the store: creates a fresh session directory under the
    /// configured root and, unless preservation is requested, sweeps
    /// whatever earlier sessions left behind.
    pub fn open(config: StoreConfig) -> Result<Arc<Self>, StoreError> {
        let session_dir = config.root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&session_dir)?;
        let store = Arc::new(Self {
            root: config.root,
            session_dir,
            capture_bodies: config.capture_bodies,
            writer: writer::spawn()?,
        });
        if !config.preserve_across_sessions {
            store.clear_all();
        }
        Ok(store)
    }

    /// Queues a full body for the background writer. Returns
    /// immediately; call `flush` to wait for disk.
    pub fn store(&self, id: &RequestId, direction: BodyDirection, body: &str) {
        if !self.capture_bodies {
            return;
        }
        let path = layout::body_path(&self.session_dir, id, direction);
        self.writer.enqueue(path, body.as_bytes().to_vec());
    }

    /// Reads a stored body back. Missing files answer `None`; so does
    /// any other read failure, after a log line.
    pub fn load(&self, id: &RequestId, direction: BodyDirection) -> Option<String> {
        let path = layout::body_path(&self.session_dir, id, direction);
        match fs::read_to_string(&path) {
            Ok(body) => Some(body),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(target: "body-store", "read failed for {}: {err}", path.display());
                None
            }
        }
    }

    /// Removes every stored body: files in the live session directory
    /// plus any directories left by earlier sessions. Returns how many
    /// entries went away.
    pub fn clear_all(&self) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(target: "body-store", "cannot list {}: {err}", self.root.display());
                return 0;
            }
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path == self.session_dir {
                removed += clear_directory_files(&path);
            } else if path.is_dir() {
                match fs::remove_dir_all(&path) {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        warn!(target: "body-store", "cannot remove {}: {err}", path.display())
                    }
                }
            }
        }
        debug!(target: "body-store", removed, "store cleared");
        removed
    }

    /// Blocks until every body queued so far is on disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        Ok(self.writer.drain()?)
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }
}

fn clear_directory_files(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        if fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}

impl BodySink for BodyStore {
    fn submit(&self, id: &RequestId, direction: BodyDirection, body: &str) {
        self.store(id, direction, body);
    }
}
