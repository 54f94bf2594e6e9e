//! Trait abstractions for the log clock and the log destination to enable testing

use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Format of the per-run log file name
pub const LOG_FILE_NAME_FORMAT: &str = "%Y%m%d_%H%M%S.log";

/// Source of wall-clock time for record stamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The local system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Line-oriented sink for formatted log records
pub trait LogDestination: Send {
    /// Write one line (without the trailing newline)
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Flush buffered lines to durable storage
    fn flush(&mut self) -> io::Result<()>;
}

/// Append-only text file, one per process run
pub struct FileDestination {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl std::fmt::Debug for FileDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDestination")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileDestination {
    /// Create `dir` if needed and open a file named after `started`
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory for log files
    /// * `started` - Run start time, used as the file name
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or the file cannot be opened
    pub fn open(dir: &Path, started: DateTime<Local>) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(started.format(LOG_FILE_NAME_FORMAT).to_string());
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogDestination for FileDestination {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Stand-in used when the log file could not be opened
///
/// Every write fails so the sink counts the record as dropped.
#[derive(Debug, Default)]
pub struct NullDestination;

impl LogDestination for NullDestination {
    fn write_line(&mut self, _line: &str) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::NotConnected, "log file not open"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
