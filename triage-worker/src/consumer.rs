//! Consumer loop — drains the report queue one message at a time.
//!
//! Each popped message is parsed, analyzed and stored before the next pop.
//! Delivery is at-most-once: a message that fails at any stage is logged and
//! dropped, never pushed back.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use triage_core::{
    AnalysisBackend, BugReportRecord, IncomingReport, ReportQueue, ReportStore, TriageError,
    UNKNOWN_ERROR_PLACEHOLDER,
};

/// Wire shape of a queued report. Absent and `null` fields are treated alike.
#[derive(Debug, Deserialize)]
struct ReportPayload {
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
    breadcrumbs: Option<Vec<Value>>,
}

/// Parse a queue message body into a report.
pub fn parse_report(payload: &[u8]) -> Result<IncomingReport, TriageError> {
    let value: Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(TriageError::InvalidPayload(
            "expected a JSON object".to_string(),
        ));
    }

    let raw: ReportPayload = serde_json::from_value(value)?;

    Ok(IncomingReport {
        error_message: raw
            .error_message
            .unwrap_or_else(|| UNKNOWN_ERROR_PLACEHOLDER.to_string()),
        breadcrumbs: raw.breadcrumbs.unwrap_or_default(),
    })
}

/// Parse, analyze and store one message body.
pub async fn process_message(
    payload: &[u8],
    analyzer: &dyn AnalysisBackend,
    store: &dyn ReportStore,
) -> Result<BugReportRecord, TriageError> {
    let report = parse_report(payload)?;

    tracing::info!(
        breadcrumbs = report.breadcrumbs.len(),
        backend = analyzer.name(),
        "Report received, requesting analysis"
    );

    let analysis = analyzer
        .analyze(&report.error_message, &report.breadcrumbs)
        .await;

    store.insert(&report.error_message, &analysis).await
}

/// Result of one pop-and-process step.
#[derive(Debug)]
pub enum Outcome {
    Stored(BugReportRecord),
    /// The message was popped but could not be parsed or stored. It is lost.
    Dropped(TriageError),
    /// Nothing was popped.
    QueueUnavailable(TriageError),
}

pub struct Consumer {
    queue: Box<dyn ReportQueue>,
    analyzer: Box<dyn AnalysisBackend>,
    store: Box<dyn ReportStore>,
    reconnect_delay: Duration,
}

impl Consumer {
    pub fn new(
        queue: Box<dyn ReportQueue>,
        analyzer: Box<dyn AnalysisBackend>,
        store: Box<dyn ReportStore>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            queue,
            analyzer,
            store,
            reconnect_delay,
        }
    }

    /// Pop one message (waiting as long as it takes) and process it.
    pub async fn process_next(&mut self) -> Outcome {
        match self.queue.pop().await {
            Ok(payload) => self.handle(&payload).await,
            Err(e) => Outcome::QueueUnavailable(e),
        }
    }

    async fn handle(&self, payload: &[u8]) -> Outcome {
        match process_message(payload, self.analyzer.as_ref(), self.store.as_ref()).await {
            Ok(record) => {
                tracing::info!(id = record.id, "Analysis complete and stored");
                Outcome::Stored(record)
            }
            Err(e) => {
                tracing::error!(error = %e, bytes = payload.len(), "Failed to process report, dropping it");
                Outcome::Dropped(e)
            }
        }
    }

    /// Run until `shutdown` fires. A message handed back by `pop` is always
    /// finished before the signal is honoured. A pop still waiting when the
    /// signal arrives is abandoned; if the broker had already removed a
    /// message for it, that message is lost along with any other at-most-once
    /// drop.
    ///
    /// A closed channel is not a shutdown request: the loop keeps running.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(backend = self.analyzer.name(), "Listening for error reports");

        loop {
            let popped = tokio::select! {
                popped = self.queue.pop() => popped,
                _ = shutdown_requested(&mut shutdown) => break,
            };

            match popped {
                Ok(payload) => {
                    self.handle(&payload).await;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = self.reconnect_delay.as_secs(),
                        "Queue unavailable"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }
            }
        }

        tracing::info!("Consumer stopped");
    }
}

/// Resolves once shutdown is requested. Once every sender is gone nobody can
/// request it, so a closed channel never resolves.
async fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) {
    match shutdown.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => std::future::pending().await,
    }
}
