//! # Log Sink Module
//!
//! Asynchronous write-behind audit log.
//!
//! This module handles:
//! - Stamping records with wall-clock time when they are pushed
//! - Queueing records from any number of producer threads in FIFO order
//! - Draining the queue on one dedicated writer thread
//! - Draining everything pushed before shutdown, then stopping
//! - Counting records that could not be written
//!
//! Pushing never blocks on I/O and never reports an error to the caller.
//! Logging is best effort and must not hold up flight control.
//!
//! ## File Format
//!
//! One file per run, named after the run start time (`YYYYMMDD_HHMMSS.log`),
//! one record per line:
//!
//! ```text
//! [2024-03-05 07:08:09] Arming ...
//! [2024-03-05 07:08:10] Takeoff...
//! ```

pub mod destination;

pub use destination::{Clock, FileDestination, LogDestination, NullDestination, SystemClock};

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Timestamp prefix format, second resolution
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `tracing` target used when mirroring audit records to the console
pub const CONSOLE_TARGET: &str = "flight";

/// A single audit log entry
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

impl LogRecord {
    pub fn new(timestamp: DateTime<Local>, text: String) -> Self {
        Self { timestamp, text }
    }

    /// Render as a log file line, without the newline
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Local, TimeZone};
    /// use ground_control::log_sink::LogRecord;
    ///
    /// let ts = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
    /// let record = LogRecord::new(ts, "Arming ...".to_string());
    /// assert_eq!(record.to_line(), "[2024-03-05 07:08:09] Arming ...");
    /// ```
    pub fn to_line(&self) -> String {
        format!("[{}] {}", self.timestamp.format(TIMESTAMP_FORMAT), self.text)
    }
}

enum Entry {
    Record(LogRecord),
    Shutdown,
}

#[derive(Debug, Default)]
struct SinkStats {
    written: AtomicU64,
    dropped: AtomicU64,
}

impl SinkStats {
    fn record_drop(&self, reason: &dyn std::fmt::Display) {
        // Warn on the first loss only, the counter carries the rest.
        if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
            warn!("Audit log record dropped: {}", reason);
        }
    }
}

struct Inner {
    tx: UnboundedSender<Entry>,
    clock: Arc<dyn Clock>,
    stats: Arc<SinkStats>,
    worker: Mutex<Option<JoinHandle<()>>>,
    path: Option<PathBuf>,
}

impl Inner {
    fn stop(tx: &UnboundedSender<Entry>, worker: Option<JoinHandle<()>>) {
        if let Some(handle) = worker {
            // Receiver is only gone if the writer thread already exited.
            let _ = tx.send(Entry::Shutdown);
            if handle.join().is_err() {
                error!("Audit log writer thread panicked");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let worker = match self.worker.get_mut() {
            Ok(worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        Inner::stop(&self.tx, worker);
    }
}

/// Handle to the audit log
///
/// Cheap to clone; every clone feeds the same queue and writer thread. The
/// writer stops when [`LogSink::shutdown`] is called or the last handle is
/// dropped.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("path", &self.inner.path)
            .field("written", &self.written())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl LogSink {
    /// Open a fresh log file in `dir` and start the writer thread
    ///
    /// Failing to open the file is not an error: the sink still accepts
    /// records and counts them as dropped.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ground_control::log_sink::LogSink;
    ///
    /// let log = LogSink::open("./logs");
    /// log.push("Connecting to vehicle");
    /// log.shutdown();
    /// ```
    pub fn open<P: AsRef<Path>>(dir: P) -> Self {
        Self::open_with_clock(dir, Arc::new(SystemClock))
    }

    /// Same as [`LogSink::open`] with an explicit clock
    pub fn open_with_clock<P: AsRef<Path>>(dir: P, clock: Arc<dyn Clock>) -> Self {
        let dir = dir.as_ref();
        match FileDestination::open(dir, clock.now()) {
            Ok(dest) => {
                let path = dest.path().to_path_buf();
                info!("Audit log opened at {}", path.display());
                Self::spawn(dest, clock, Some(path))
            }
            Err(e) => {
                warn!(
                    "Failed to open audit log in {}: {} (records will be dropped)",
                    dir.display(),
                    e
                );
                Self::spawn(NullDestination, clock, None)
            }
        }
    }

    /// Start a sink writing to an arbitrary destination
    pub fn with_destination<D>(dest: D, clock: Arc<dyn Clock>) -> Self
    where
        D: LogDestination + 'static,
    {
        Self::spawn(dest, clock, None)
    }

    fn spawn<D>(dest: D, clock: Arc<dyn Clock>, path: Option<PathBuf>) -> Self
    where
        D: LogDestination + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(SinkStats::default());

        let worker_stats = Arc::clone(&stats);
        let worker = thread::Builder::new()
            .name("log-sink".to_string())
            .spawn(move || drain(rx, dest, &worker_stats));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                // The receiver went down with the closure, every push now counts as dropped.
                warn!("Failed to start audit log writer: {}", e);
                None
            }
        };

        Self {
            inner: Arc::new(Inner {
                tx,
                clock,
                stats,
                worker: Mutex::new(worker),
                path,
            }),
        }
    }

    /// Enqueue a message
    ///
    /// The record is stamped now, not when it reaches the file.
    pub fn push(&self, message: impl Into<String>) {
        let record = LogRecord::new(self.inner.clock.now(), message.into());
        if self.inner.tx.send(Entry::Record(record)).is_err() {
            self.inner.stats.record_drop(&"log sink is shut down");
        }
    }

    /// Push and mirror to the console at INFO
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: CONSOLE_TARGET, "{}", message);
        self.push(message);
    }

    /// Push and mirror to the console at WARN
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: CONSOLE_TARGET, "{}", message);
        self.push(message);
    }

    /// Push and mirror to the console at ERROR
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(target: CONSOLE_TARGET, "{}", message);
        self.push(message);
    }

    /// Drain everything pushed so far, then stop the writer thread
    ///
    /// Blocks until the writer has finished. Calling it again is a no-op.
    /// Records pushed afterwards are counted as dropped.
    pub fn shutdown(&self) {
        let worker = match self.inner.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        Inner::stop(&self.inner.tx, worker);
    }

    /// Number of records written to the destination
    pub fn written(&self) -> u64 {
        self.inner.stats.written.load(Ordering::Relaxed)
    }

    /// Number of records lost to write failures or pushed after shutdown
    pub fn dropped(&self) -> u64 {
        self.inner.stats.dropped.load(Ordering::Relaxed)
    }

    /// Path of the log file, if one was opened
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }
}

/// Writer thread body
///
/// Blocks for the first entry, then takes everything already queued in the
/// same pass before flushing.
fn drain<D: LogDestination>(mut rx: UnboundedReceiver<Entry>, mut dest: D, stats: &SinkStats) {
    while let Some(first) = rx.blocking_recv() {
        let mut shutdown = false;
        let mut next = Some(first);

        while let Some(entry) = next.take() {
            match entry {
                Entry::Record(record) => match dest.write_line(&record.to_line()) {
                    Ok(()) => {
                        stats.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => stats.record_drop(&e),
                },
                Entry::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
            next = rx.try_recv().ok();
        }

        if let Err(e) = dest.flush() {
            debug!("Failed to flush audit log: {}", e);
        }

        if shutdown {
            rx.close();
            while let Ok(entry) = rx.try_recv() {
                if let Entry::Record(_) = entry {
                    stats.record_drop(&"pushed after shutdown");
                }
            }
            break;
        }
    }
    debug!("Audit log writer stopped");
}
