// ABOUTME: Append-only line log: one record per newline-terminated line, read back in append order.
// ABOUTME: Appends surface errors per call while fsync is batched at a fixed commit cadence.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use telespool_core::Record;
use thiserror::Error;

use crate::fsync::{fsync_dir, fsync_file};

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("log not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("commit threshold must be greater than zero")]
    InvalidThreshold,
}

/// A persistent record log identified by its path.
///
/// The log itself holds no open handle. Each phase takes an owned
/// [`LogWriter`] or [`LogReader`], and the handle is released when that
/// value is closed or dropped, whichever exit path the phase takes.
#[derive(Debug, Clone)]
pub struct PersistentLog {
    path: PathBuf,
}

impl PersistentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff the log file is present in the store.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Open the log for appending, creating it if absent.
    ///
    /// The parent directory is the store and must already exist; a missing
    /// store is reported as an I/O failure rather than silently created.
    pub fn open_for_append(&self) -> Result<LogWriter, LogError> {
        let created = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if created {
            let parent = self
                .path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            fsync_dir(parent)?;
            tracing::info!(path = %self.path.display(), "created log");
        }

        Ok(LogWriter {
            path: self.path.clone(),
            file,
            pending: 0,
            appended: 0,
            commits: 0,
        })
    }

    /// Open the log for sequential forward reads from the first record.
    pub fn open_for_read(&self) -> Result<LogReader, LogError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LogError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(LogReader {
            path: self.path.clone(),
            reader: BufReader::new(file),
            last_seq: 0,
            exhausted: false,
            degraded: false,
        })
    }

    /// Count the records currently in the log by scanning it.
    pub fn count_records(&self) -> Result<u64, LogError> {
        let mut reader = self.open_for_read()?;
        while reader.read_next_line().is_some() {}
        Ok(reader.records_read())
    }
}

/// Counters reported when an append handle is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub appended: u64,
    pub commits: u64,
    /// Appends not covered by a cadence commit at the time of closing.
    pub pending: u64,
}

/// Exclusive append handle for the fill phase.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    pending: u64,
    appended: u64,
    commits: u64,
}

impl LogWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends since the last durability commit.
    pub fn pending(&self) -> u64 {
        self.pending
    }

    /// Records appended through this handle.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Durability commits performed through this handle.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Append one record as a newline-terminated line.
    ///
    /// A single trailing newline on `line` is treated as the terminator and
    /// not duplicated. Embedded newlines are written unchanged and will
    /// split the record when read back.
    pub fn append_line(&mut self, line: &[u8]) -> Result<(), LogError> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        if line.contains(&b'\n') {
            tracing::warn!(
                path = %self.path.display(),
                appended = self.appended,
                "record contains an embedded newline; it will read back as several records"
            );
        }

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        self.file.write_all(&buf)?;

        self.pending += 1;
        self.appended += 1;
        Ok(())
    }

    /// Force a durability commit once `threshold` appends are pending.
    /// Returns true if a commit happened.
    pub fn commit_if_due(&mut self, threshold: u64) -> Result<bool, LogError> {
        if threshold == 0 {
            return Err(LogError::InvalidThreshold);
        }
        if self.pending < threshold {
            return Ok(false);
        }
        self.commit()?;
        Ok(true)
    }

    /// Flush every pending append to the medium and reset the counter.
    pub fn commit(&mut self) -> Result<(), LogError> {
        tracing::info!(
            path = %self.path.display(),
            pending = self.pending,
            "committing log"
        );
        fsync_file(&self.file)?;
        self.commits += 1;
        self.pending = 0;
        Ok(())
    }

    /// Release the handle after a closing sync. The closing sync is not
    /// counted as a commit and does not reset `pending` in the returned stats.
    pub fn close(self) -> Result<WriterStats, LogError> {
        let stats = WriterStats {
            appended: self.appended,
            commits: self.commits,
            pending: self.pending,
        };
        if self.pending > 0 {
            fsync_file(&self.file)?;
        }
        tracing::debug!(path = %self.path.display(), ?stats, "closed log writer");
        Ok(stats)
    }
}

/// Exclusive sequential reader for one drain pass.
///
/// Produces a finite, non-restartable sequence. End of data and a mid-read
/// I/O error both end the sequence; the latter is recorded in
/// [`degraded`](Self::degraded) so callers can report a partial drain.
pub struct LogReader {
    path: PathBuf,
    reader: BufReader<File>,
    last_seq: u64,
    exhausted: bool,
    degraded: bool,
}

impl LogReader {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records produced so far.
    pub fn records_read(&self) -> u64 {
        self.last_seq
    }

    /// True if the sequence ended early because of a read error.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Read the next record, or `None` once the sequence has ended.
    pub fn read_next_line(&mut self) -> Option<Record> {
        if self.exhausted {
            return None;
        }

        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                self.exhausted = true;
                None
            }
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                self.last_seq += 1;
                Some(Record::new(self.last_seq, line))
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    after_seq = self.last_seq,
                    error = %e,
                    "read error mid-log, ending sequence early"
                );
                self.exhausted = true;
                self.degraded = true;
                None
            }
        }
    }

    /// Release the read handle.
    pub fn close(self) {
        tracing::debug!(
            path = %self.path.display(),
            records = self.last_seq,
            "closed log reader"
        );
    }
}

impl Iterator for LogReader {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.read_next_line()
    }
}
