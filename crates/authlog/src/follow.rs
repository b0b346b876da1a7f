// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-by-line following of a growing log file.
//!
//! [`Follower`] reads a file from its start and then keeps waiting for
//! appended lines. It survives the usual log rotation schemes:
//!
//! - **rename + create**: the identity (device, inode) behind the path
//!   changes. The new file is opened, the old handle is drained to EOF, and
//!   reading continues at the start of the new file.
//! - **copy + truncate**: the file shrinks below the read offset and reading
//!   restarts at its beginning.
//!
//! While the path is missing (between rename and create) the old handle is
//! kept and polled.
//!
//! Lines longer than the configured limit are cut to that limit; the rest of
//! the line is skipped up to its terminator.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info, warn};

use crate::errors::Error;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

// Consecutive read errors after which the file descriptor is reopened.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 5;
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity(meta: &std::fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

// Without inode information only truncation can be detected.
#[cfg(not(unix))]
fn identity(_meta: &std::fs::Metadata) -> Option<FileIdentity> {
    None
}

async fn open_file(path: &Path) -> std::io::Result<(BufReader<File>, Option<FileIdentity>)> {
    let file = File::open(path).await?;
    let meta = file.metadata().await?;
    Ok((BufReader::new(file), identity(&meta)))
}

/// Follows one log file, yielding complete lines.
#[derive(Debug)]
pub struct Follower {
    path: PathBuf,
    reader: BufReader<File>,
    identity: Option<FileIdentity>,
    offset: u64,
    // Offset of the first byte of `pending`.
    line_start: u64,
    pending: Vec<u8>,
    max_line_len: usize,
    oversized: bool,
    oversize_warned: bool,
    rotated: Option<(BufReader<File>, Option<FileIdentity>)>,
    poll_interval: Duration,
    consecutive_errors: u32,
    outage_reported: bool,
}

impl Follower {
    /// Opens `path` for following from its first byte.
    pub async fn open(path: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, Error> {
        let path = path.into();
        let (reader, identity) = open_file(&path)
            .await
            .map_err(|source| Error::SourceUnavailable {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            reader,
            identity,
            offset: 0,
            line_start: 0,
            pending: Vec::new(),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            oversized: false,
            oversize_warned: false,
            rotated: None,
            poll_interval,
            consecutive_errors: 0,
            outage_reported: false,
        })
    }

    /// Caps the length of returned lines. Longer lines are truncated.
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the next complete line, without its line terminator.
    ///
    /// Errors are transient: the follower stays usable and the next call
    /// resumes following.
    pub async fn next_line(&mut self) -> Result<Vec<u8>, Error> {
        loop {
            match self.fill_line().await {
                Ok(None) => {
                    if let Some(line) = self.on_eof().await? {
                        return Ok(line);
                    }
                }
                Ok(Some(complete)) => {
                    self.consecutive_errors = 0;
                    // Without a terminator the writer is mid-line; keep the
                    // bytes and wait for the rest.
                    if complete {
                        return Ok(self.take_line());
                    }
                }
                Err(source) => {
                    self.consecutive_errors += 1;
                    if self.consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        self.consecutive_errors = 0;
                        self.reopen_at_line_start().await;
                    }
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                    return Err(Error::Transport {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }
    }

    // Moves buffered bytes into `pending`, stopping after the first line
    // terminator. Returns `None` at EOF and whether a line was completed
    // otherwise. `pending` never grows past `max_line_len`.
    async fn fill_line(&mut self) -> std::io::Result<Option<bool>> {
        let available = self.reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(None);
        }
        let (consumed, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (end + 1, true),
            None => (available.len(), false),
        };
        let content = &available[..consumed - usize::from(complete)];
        let room = self.max_line_len.saturating_sub(self.pending.len());
        if content.len() > room {
            self.oversized = true;
        }
        self.pending
            .extend_from_slice(&content[..content.len().min(room)]);
        self.reader.consume(consumed);
        self.offset += consumed as u64;
        Ok(Some(complete))
    }

    fn take_line(&mut self) -> Vec<u8> {
        let mut line = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.oversized) && !self.oversize_warned {
            self.oversize_warned = true;
            warn!(
                "Line exceeds {} bytes in {}, truncating",
                self.max_line_len,
                self.path.display()
            );
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        self.line_start = self.offset;
        line
    }

    fn reset_line(&mut self, offset: u64) {
        self.offset = offset;
        self.line_start = offset;
        self.pending.clear();
        self.oversized = false;
    }

    async fn on_eof(&mut self) -> Result<Option<Vec<u8>>, Error> {
        // The old file is fully drained, move over to the rotated-in one.
        if let Some((reader, identity)) = self.rotated.take() {
            let leftover = (!self.pending.is_empty()).then(|| self.take_line());
            self.reader = reader;
            self.identity = identity;
            self.reset_line(0);
            info!("Following rotated file {}", self.path.display());
            return Ok(leftover);
        }

        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                let current = identity(&meta);
                if current.is_some() && current != self.identity {
                    debug!("{} was rotated, opening the new file", self.path.display());
                    return match open_file(&self.path).await {
                        Ok(next) => {
                            self.outage_reported = false;
                            self.rotated = Some(next);
                            Ok(None)
                        }
                        Err(source) => self.report_outage(source).await,
                    };
                }
                self.outage_reported = false;
                if meta.len() < self.offset {
                    info!(
                        "{} was truncated, reading from the start",
                        self.path.display()
                    );
                    self.reader
                        .seek(SeekFrom::Start(0))
                        .await
                        .map_err(|source| Error::Transport {
                            path: self.path.clone(),
                            source,
                        })?;
                    self.reset_line(0);
                    return Ok(None);
                }
            }
            // Between rename and create; keep polling the old handle.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return self.report_outage(source).await,
        }

        tokio::time::sleep(self.poll_interval).await;
        Ok(None)
    }

    // Reports an unreachable path once per outage; later failures are retried
    // silently at the poll interval.
    async fn report_outage(&mut self, source: std::io::Error) -> Result<Option<Vec<u8>>, Error> {
        tokio::time::sleep(self.poll_interval).await;
        if self.outage_reported {
            return Ok(None);
        }
        self.outage_reported = true;
        Err(Error::SourceUnavailable {
            path: self.path.clone(),
            source,
        })
    }

    // Reopens the path at the start of the unfinished line.
    async fn reopen_at_line_start(&mut self) {
        let line_start = self.line_start;
        let reopened = async {
            let (mut reader, identity) = open_file(&self.path).await?;
            reader.seek(SeekFrom::Start(line_start)).await?;
            Ok::<_, std::io::Error>((reader, identity))
        }
        .await;
        match reopened {
            Ok((reader, identity)) => {
                debug!("Reopened {} at offset {}", self.path.display(), line_start);
                self.reader = reader;
                self.identity = identity;
                self.reset_line(line_start);
            }
            Err(e) => warn!("Failed to reopen {}: {}", self.path.display(), e),
        }
    }
}
