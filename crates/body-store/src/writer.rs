//! Background writer thread. Body writes never block capture, so the
//! store hands each payload to a named thread over a channel and moves
//! on; `drain` is the only synchronization point.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;

use tracing::warn;

enum Command {
    Write { path: PathBuf, data: Vec<u8> },
    Flush(mpsc::Sender<()>),
    Shutdown,
}

pub(crate) struct WriterHandle {
    tx: Sender<Command>,
}

impl WriterHandle {
    pub(crate) fn enqueue(&self, path: PathBuf, data: Vec<u8>) {
        if self.tx.send(Command::Write { path, data }).is_err() {
            warn!(target: "body-store", "writer thread gone, body dropped");
        }
    }

    /// Blocks until every write queued before this call has hit disk.
    pub(crate) fn drain(&self) -> io::Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Command::Flush(reply_tx))
            .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err.to_string()))?;
        reply_rx
            .recv()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

pub(crate) fn spawn() -> io::Result<WriterHandle> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("body-store-writer".into())
        .spawn(move || {
            while let Ok(command) = rx.recv() {
                match command {
                    Command::Write { path, data } => {
                        if let Err(err) = write_atomic(&path, &data) {
                            warn!(target: "body-store", "write failed for {}: {err}", path.display());
                        }
                    }
                    Command::Flush(reply) => {
                        let _ = reply.send(());
                    }
                    Command::Shutdown => break,
                }
            }
        })?;
    Ok(WriterHandle { tx })
}

/// Readers must never observe a half-written body, so writes land in a
/// sibling tmp file and rename into place.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}
