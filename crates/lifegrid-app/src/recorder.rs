//! JSON-lines persistence collaborator.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use lifegrid_core::{SimulationObserver, TickBatch};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("recorder worker error: {0}")]
    Worker(String),
}

#[derive(Debug)]
enum RecorderCommand {
    Record(Box<TickBatch>),
    Flush,
    Shutdown,
}

/// Observer that writes one JSON object per batch on a background thread.
///
/// The tick loop only clones the batch into a channel; encoding and file I/O happen on
/// the worker. Write failures are logged and the batch is dropped.
pub struct JsonlRecorder {
    tx: mpsc::Sender<RecorderCommand>,
    path: PathBuf,
    include_policies: bool,
    handle: Option<thread::JoinHandle<()>>,
}

impl JsonlRecorder {
    /// Create (or truncate) `path` and start the writer thread.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let (tx, rx) = mpsc::channel::<RecorderCommand>();
        let handle = thread::Builder::new()
            .name("lifegrid-recorder".into())
            .spawn(move || {
                let mut writer = BufWriter::new(file);
                while let Ok(command) = rx.recv() {
                    match command {
                        RecorderCommand::Record(batch) => {
                            if let Err(err) = write_line(&mut writer, &batch) {
                                warn!(tick = batch.tick, error = %err, "failed to record batch");
                            }
                        }
                        RecorderCommand::Flush => {
                            if let Err(err) = writer.flush() {
                                warn!(error = %err, "failed to flush recorder");
                            }
                        }
                        RecorderCommand::Shutdown => break,
                    }
                }
                if let Err(err) = writer.flush() {
                    warn!(error = %err, "failed to flush recorder on shutdown");
                }
            })
            .map_err(|err| {
                RecorderError::Worker(format!("failed to spawn recorder thread: {err}"))
            })?;
        debug!(path = %path.display(), "recorder started");
        Ok(Self {
            tx,
            path,
            include_policies: true,
            handle: Some(handle),
        })
    }

    /// Skip periodic policy snapshots, which dominate the output size.
    #[must_use]
    pub fn without_policies(mut self) -> Self {
        self.include_policies = false;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Request an immediate flush of buffered lines.
    pub fn flush(&self) {
        let _ = self.tx.send(RecorderCommand::Flush);
    }
}

fn write_line(writer: &mut impl Write, batch: &TickBatch) -> Result<(), RecorderError> {
    serde_json::to_writer(&mut *writer, batch).map_err(std::io::Error::from)?;
    writer.write_all(b"\n")?;
    Ok(())
}

impl SimulationObserver for JsonlRecorder {
    fn on_tick(&mut self, batch: &TickBatch) {
        if self
            .tx
            .send(RecorderCommand::Record(Box::new(batch.clone())))
            .is_err()
        {
            warn!(tick = batch.tick, "recorder channel closed; batch dropped");
        }
    }

    fn wants_policy_snapshots(&self) -> bool {
        self.include_policies
    }
}

impl Drop for JsonlRecorder {
    fn drop(&mut self) {
        let _ = self.tx.send(RecorderCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            warn!(?err, "recorder thread panicked");
        }
    }
}
