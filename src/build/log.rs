//! Per-build log mirrored to a durable file and to `tracing`.
//!
//! Every line is emitted through `tracing` at `info` or `error` level and kept
//! in memory in arrival order. Once the pipeline holds its target lock, lines
//! are also appended to `<destination>/build.log`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

/// File name of the per-build log inside a destination directory.
pub const BUILD_LOG_FILE: &str = "build.log";

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

/// One recorded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

struct LogInner {
    file: Option<File>,
    lines: Vec<LogLine>,
    closed: bool,
}

/// Append-only log for one pipeline run.
///
/// Starts in memory. [`BuildLog::persist`] attaches the destination's
/// `build.log`, writing out everything recorded so far; from then on every
/// line is appended to the file as well. Shared by reference between the
/// pipeline and the command runner; all methods take `&self`.
pub struct BuildLog {
    repo: String,
    inner: Mutex<LogInner>,
}

impl BuildLog {
    /// A log with no backing file yet. Lines still reach `tracing`.
    pub fn in_memory(repo: impl Into<String>) -> Self {
        BuildLog {
            repo: repo.into(),
            inner: Mutex::new(LogInner {
                file: None,
                lines: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Opens (appending) `<dir>/build.log`, creating `dir` if needed, and
    /// writes the lines recorded so far.
    ///
    /// Only the holder of the target lock may call this: the file is shared
    /// by every build of the target.
    pub fn persist(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(BUILD_LOG_FILE);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.lock();
        for line in &inner.lines {
            writeln!(file, "{}", line.message)?;
        }
        inner.file = Some(file);
        Ok(())
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(repo = %self.repo, "{message}");
        self.append(LogLevel::Info, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(repo = %self.repo, "{message}");
        self.append(LogLevel::Error, message);
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, level: LogLevel, message: String) {
        let mut inner = self.lock();
        if inner.closed {
            warn!(repo = %self.repo, "line logged after build log was closed");
            return;
        }
        if let Some(file) = inner.file.as_mut()
            && let Err(e) = writeln!(file, "{message}")
        {
            // Write failures never fail the build.
            warn!(repo = %self.repo, error = %e, "failed to write build log");
        }
        inner.lines.push(LogLine { level, message });
    }

    /// All lines recorded so far, in order.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lock().lines.clone()
    }

    /// Messages of all lines, in order.
    pub fn messages(&self) -> Vec<String> {
        self.lock().lines.iter().map(|l| l.message.clone()).collect()
    }

    /// Messages of error lines only, in order.
    pub fn errors(&self) -> Vec<String> {
        self.lock()
            .lines
            .iter()
            .filter(|l| l.level == LogLevel::Error)
            .map(|l| l.message.clone())
            .collect()
    }

    /// Flushes and syncs the file. Later lines are dropped with a warning.
    pub fn close(&self) -> io::Result<()> {
        let mut inner = self.lock();
        inner.closed = true;
        match inner.file.take() {
            Some(mut file) => {
                file.flush()?;
                file.sync_all()
            }
            None => Ok(()),
        }
    }
}
