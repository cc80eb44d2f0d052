//! Typed progress events of an analysis run.
//!
//! Events travel over an unbounded channel, so the worker never blocks on a
//! slow consumer. Each run ends with exactly one terminal event.

use tokio::sync::mpsc;

use crate::stats::{AnalysisResult, DayStats};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// History resolved; `commits` will be walked (before any resume cut)
    History { commits: usize },
    /// Continuing from a prior result at commit `from`
    Resumed { from: String, pending: usize },
    /// `done` of `total` commits applied
    Processing { done: usize, total: usize },
    /// A finished day
    Day(DayStats),
    Warning(String),
    Completed(Box<AnalysisResult>),
    Failed(String),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Completed(_) | ProgressEvent::Failed(_))
    }
}

/// Sending half of a progress stream.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// A connected sink and its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening anymore
            let _ = tx.send(event);
        }
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.emit(ProgressEvent::Warning(message));
    }
}
