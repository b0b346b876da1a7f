// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background task turning a followed log file into enriched events.
//!
//! Lines are read in file order, parsed, run through the enrichment chain and
//! pushed to the event queue. Non-fatal failures go to the error queue and the
//! reader keeps going. A single task does all of this, so events reach the
//! queue in the order their lines appear in the file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::enrichment::EnrichmentChain;
use crate::errors::{Error, ParseError};
use crate::event::FailedConnEvent;
use crate::follow::{Follower, DEFAULT_MAX_LINE_LEN, DEFAULT_POLL_INTERVAL};
use crate::parser::Parser;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// What the reader does when a queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Wait for the consumer to make room. Stop requests interrupt the wait.
    #[default]
    Block,
    /// Discard the item that does not fit and keep reading.
    DropNewest,
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub path: PathBuf,
    pub poll_interval: Duration,
    /// Lines longer than this many bytes are truncated.
    pub max_line_len: usize,
    pub backpressure: Backpressure,
}

impl ReaderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            backpressure: Backpressure::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    Running,
    StopRequested,
    Stopped,
}

pub struct FileReader {
    config: ReaderConfig,
    parser: Parser,
    chain: EnrichmentChain,
    events_tx: Sender<FailedConnEvent>,
    errors_tx: Sender<Error>,
    cancel_token: CancellationToken,
}

impl FileReader {
    pub fn new(
        config: ReaderConfig,
        parser: Parser,
        chain: EnrichmentChain,
        events_tx: Sender<FailedConnEvent>,
        errors_tx: Sender<Error>,
    ) -> Self {
        Self {
            config,
            parser,
            chain,
            events_tx,
            errors_tx,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Opens the log file and spawns the reading task.
    ///
    /// Fails with [`Error::SourceUnavailable`] when the file cannot be opened;
    /// no task is started in that case.
    pub async fn start(self) -> Result<ReaderHandle, Error> {
        let follower = Follower::open(&self.config.path, self.config.poll_interval)
            .await?
            .with_max_line_len(self.config.max_line_len);
        info!("Following {}", self.config.path.display());

        let status = Arc::new(RwLock::new(ReaderStatus::Running));
        let task_status = Arc::clone(&status);
        let cancel_token = self.cancel_token.clone();
        let task = tokio::spawn(async move {
            self.spin(follower).await;
            *task_status.write().await = ReaderStatus::Stopped;
        });

        Ok(ReaderHandle {
            cancel_token,
            status,
            task: Some(task),
        })
    }

    async fn spin(&self, mut follower: Follower) {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                next = follower.next_line() => next,
            };
            let keep_going = match next {
                Ok(line) => self.process_line(&line).await,
                Err(e) => self.emit(&self.errors_tx, e).await,
            };
            if !keep_going {
                break;
            }
        }
        debug!("Stopped reading {}", follower.path().display());
    }

    // Returns false once the reader has to stop.
    async fn process_line(&self, line: &[u8]) -> bool {
        let event = match self.parser.parse_bytes(line) {
            Ok(event) => event,
            Err(ParseError::WrongFormat) => return true,
            Err(e) => return self.emit(&self.errors_tx, e.into()).await,
        };

        let (event, failures) = tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => return false,
            enriched = self.chain.apply(event) => enriched,
        };
        for failure in failures {
            if !self.emit(&self.errors_tx, failure.into()).await {
                return false;
            }
        }
        self.emit(&self.events_tx, event).await
    }

    async fn emit<T>(&self, tx: &Sender<T>, item: T) -> bool {
        match self.config.backpressure {
            Backpressure::Block => tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => false,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        debug!("Queue closed, stopping reader");
                    }
                    sent.is_ok()
                }
            },
            Backpressure::DropNewest => match tx.try_send(item) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Queue full, dropping item");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Queue closed, stopping reader");
                    false
                }
            },
        }
    }
}

/// Control surface of a started [`FileReader`].
pub struct ReaderHandle {
    cancel_token: CancellationToken,
    status: Arc<RwLock<ReaderStatus>>,
    task: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    pub async fn status(&self) -> ReaderStatus {
        *self.status.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.status().await == ReaderStatus::Running
    }

    /// Asks the reader to stop and waits until it has. Once this returns the
    /// reader pushes nothing more to its queues and the file is closed.
    pub async fn stop(&mut self) {
        {
            let mut status = self.status.write().await;
            if *status == ReaderStatus::Running {
                *status = ReaderStatus::StopRequested;
            }
        }
        self.cancel_token.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Reader task failed: {}", e);
            }
        }
        *self.status.write().await = ReaderStatus::Stopped;
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use tokio::sync::mpsc::{self, Receiver};
    use tokio::time::timeout;
    use tracing_test::traced_test;

    const WAIT: Duration = Duration::from_secs(5);

    fn append(path: &Path, content: &[u8]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(content).unwrap();
    }

    fn attempt(user: &str, ip: &str) -> String {
        format!(
            "2023-06-01T10:15:30.000Z host sshd[1]: Failed password for {user} from {ip} port 22 ssh2\n"
        )
    }

    fn reader(
        path: &Path,
        capacity: usize,
        backpressure: Backpressure,
    ) -> (FileReader, Receiver<FailedConnEvent>, Receiver<Error>) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);
        let config = ReaderConfig {
            poll_interval: Duration::from_millis(10),
            backpressure,
            ..ReaderConfig::new(path)
        };
        let reader = FileReader::new(
            config,
            Parser::default(),
            EnrichmentChain::default(),
            events_tx,
            errors_tx,
        );
        (reader, events_rx, errors_rx)
    }

    async fn recv<T>(rx: &mut Receiver<T>) -> T {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_events_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        let mut content = attempt("alice", "10.0.0.1");
        content.push_str("Jun  1 10:15:31 host CRON[2]: pam_unix(cron:session): session opened\n");
        content.push_str(&attempt("bob", "10.0.0.2"));
        append(&path, content.as_bytes());

        let (reader, mut events_rx, mut errors_rx) = reader(&path, 10, Backpressure::Block);
        let mut handle = reader.start().await.unwrap();
        assert!(handle.is_running().await);

        assert_eq!(recv(&mut events_rx).await.username, "alice");
        assert_eq!(recv(&mut events_rx).await.username, "bob");

        append(&path, attempt("carol", "10.0.0.3").as_bytes());
        assert_eq!(recv(&mut events_rx).await.username, "carol");

        handle.stop().await;
        assert_eq!(handle.status().await, ReaderStatus::Stopped);
        // Unrelated lines never surface as errors.
        assert!(errors_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_encoding_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, b"\xff\xfe broken\n");
        append(&path, attempt("alice", "10.0.0.1").as_bytes());

        let (reader, mut events_rx, mut errors_rx) = reader(&path, 10, Backpressure::Block);
        let mut handle = reader.start().await.unwrap();

        let error = recv(&mut errors_rx).await;
        assert!(matches!(error, Error::Parse(ParseError::InvalidEncoding)));
        assert_eq!(recv(&mut events_rx).await.username, "alice");

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_start_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.log");

        let (reader, _events_rx, _errors_rx) = reader(&path, 10, Backpressure::Block);
        let result = reader.start().await;

        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_stop_while_blocked_on_full_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        for user in ["a", "b", "c"] {
            append(&path, attempt(user, "10.0.0.1").as_bytes());
        }

        let (reader, mut events_rx, _errors_rx) = reader(&path, 1, Backpressure::Block);
        let mut handle = reader.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        timeout(WAIT, handle.stop())
            .await
            .expect("stop must not wait for the consumer");
        assert_eq!(handle.status().await, ReaderStatus::Stopped);

        // Only what fit in the queue was delivered, and the sender is gone.
        assert_eq!(events_rx.recv().await.unwrap().username, "a");
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_drop_newest_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        for user in ["a", "b", "c"] {
            append(&path, attempt(user, "10.0.0.1").as_bytes());
        }

        let (reader, mut events_rx, _errors_rx) = reader(&path, 1, Backpressure::DropNewest);
        let mut handle = reader.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(recv(&mut events_rx).await.username, "a");
        append(&path, attempt("d", "10.0.0.1").as_bytes());
        assert_eq!(recv(&mut events_rx).await.username, "d");

        handle.stop().await;
        assert!(logs_contain("Queue full, dropping item"));
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, attempt("alice", "10.0.0.1").as_bytes());

        let (reader, mut events_rx, _errors_rx) = reader(&path, 10, Backpressure::Block);
        let handle = reader.start().await.unwrap();
        assert_eq!(recv(&mut events_rx).await.username, "alice");
        drop(handle);

        // The task ends and releases its senders.
        assert!(timeout(WAIT, events_rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_stops_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, attempt("alice", "10.0.0.1").as_bytes());

        let (reader, events_rx, _errors_rx) = reader(&path, 10, Backpressure::Block);
        drop(events_rx);
        let handle = reader.start().await.unwrap();

        timeout(WAIT, async {
            while handle.status().await != ReaderStatus::Stopped {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        append(&path, b"");

        let (reader, _events_rx, _errors_rx) = reader(&path, 10, Backpressure::Block);
        let mut handle = reader.start().await.unwrap();

        handle.stop().await;
        handle.stop().await;
        assert!(!handle.is_running().await);
    }
}
