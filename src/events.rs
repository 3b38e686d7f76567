//! Pipeline event channel.
//!
//! The coordinator and trigger emit `{record_id, kind}` messages instead
//! of driving any presentation directly. Observers (the CLI progress
//! printer, exporters) subscribe on the receiving end and stay fully
//! decoupled from orchestration.

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum EventKind {
    Queued,
    UploadStarted,
    Uploaded { duration_ms: i64 },
    UploadFailed { error: String },
    ProcessingStarted,
    Processed { duration_ms: i64 },
    ProcessingFailed { error: String },
}

#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub record_id: String,
    pub name: String,
    pub kind: EventKind,
}

/// Cloneable emitting half of the channel. Emission never blocks and
/// never fails the pipeline: if the observer is gone, events are
/// dropped silently.
#[derive(Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSender {
    /// A sender with no observer attached.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, record_id: &str, name: &str, kind: EventKind) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(PipelineEvent {
                record_id: record_id.to_string(),
                name: name.to_string(),
                kind,
            });
        }
    }
}

pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<PipelineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx: Some(tx) }, rx)
}

/// Render an event as the one-line progress message the CLI prints.
pub fn describe(event: &PipelineEvent) -> String {
    match &event.kind {
        EventKind::Queued => format!("queued   {}", event.name),
        EventKind::UploadStarted => format!("upload   {} ...", event.name),
        EventKind::Uploaded { duration_ms } => {
            format!("uploaded {} ({} ms)", event.name, duration_ms)
        }
        EventKind::UploadFailed { error } => {
            format!("failed   {} ({})", event.name, error)
        }
        EventKind::ProcessingStarted => format!("process  {} ...", event.name),
        EventKind::Processed { duration_ms } => {
            format!("processed {} ({} ms)", event.name, duration_ms)
        }
        EventKind::ProcessingFailed { error } => {
            format!("proc-failed {} ({})", event.name, error)
        }
    }
}
