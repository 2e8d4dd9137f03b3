//! Output writers for mirroring worker output outside the process.

use crate::types::OutputLine;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use wsv_common::{ProcessError, ProcessResult};

const WRITER_ID: &str = "output-mirror";

/// Destination for captured lines besides the in-memory log.
pub trait OutputWriter: Send + Sync {
    fn write(&self, line: &OutputLine) -> ProcessResult<()>;

    fn flush(&self) -> ProcessResult<()>;
}

/// Appends captured lines to a file.
pub struct FileOutputWriter {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl FileOutputWriter {
    /// Opens `path` for appending, creating parent directories if needed.
    pub fn new(path: impl Into<PathBuf>) -> ProcessResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ProcessError::io(WRITER_ID, &e))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ProcessError::io(WRITER_ID, &e))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputWriter for FileOutputWriter {
    fn write(&self, line: &OutputLine) -> ProcessResult<()> {
        let mut writer = self.writer.lock();

        // Format: [timestamp] [stream] text
        let formatted = format!(
            "[{}] [{}] {}\n",
            line.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            line.stream,
            line.text
        );

        writer
            .write_all(formatted.as_bytes())
            .map_err(|e| ProcessError::io(WRITER_ID, &e))
    }

    fn flush(&self) -> ProcessResult<()> {
        self.writer
            .lock()
            .flush()
            .map_err(|e| ProcessError::io(WRITER_ID, &e))
    }
}

impl Drop for FileOutputWriter {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}
