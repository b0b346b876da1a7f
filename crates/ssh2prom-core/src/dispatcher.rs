// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consumer side of the pipeline.
//!
//! The [`Dispatcher`] is the only reader of the event and error queues. It
//! reports every event, logs every error and, on shutdown, stops the reader
//! before draining what is already queued.

use authlog::{Error, FailedConnEvent, ReaderHandle};
use std::future::Future;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info};

use crate::metrics::Reporter;

/// Counts of what a [`Dispatcher`] consumed over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub events: u64,
    pub errors: u64,
}

pub struct Dispatcher<R> {
    events_rx: Receiver<FailedConnEvent>,
    errors_rx: Receiver<Error>,
    reporter: R,
}

impl<R: Reporter> Dispatcher<R> {
    pub fn new(events_rx: Receiver<FailedConnEvent>, errors_rx: Receiver<Error>, reporter: R) -> Self {
        Self {
            events_rx,
            errors_rx,
            reporter,
        }
    }

    /// Consumes both queues until `shutdown` resolves, then stops `reader`
    /// and drains the queues.
    pub async fn run<F>(mut self, mut reader: ReaderHandle, shutdown: F) -> DispatchSummary
    where
        F: Future<Output = ()>,
    {
        let mut summary = DispatchSummary::default();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping reader");
                    break;
                }
                Some(event) = self.events_rx.recv() => self.on_event(event, &mut summary),
                Some(error) = self.errors_rx.recv() => self.on_error(error, &mut summary),
            }
        }

        reader.stop().await;
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_event(event, &mut summary);
        }
        while let Ok(error) = self.errors_rx.try_recv() {
            self.on_error(error, &mut summary);
        }
        debug!(
            "Dispatcher finished after {} events and {} errors",
            summary.events, summary.errors
        );
        summary
    }

    fn on_event(&self, event: FailedConnEvent, summary: &mut DispatchSummary) {
        debug!("Failed connection: {}", event);
        self.reporter.report(&event);
        summary.events += 1;
    }

    fn on_error(&self, error: Error, summary: &mut DispatchSummary) {
        error!("{}", error);
        summary.errors += 1;
    }
}
