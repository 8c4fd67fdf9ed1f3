use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    discovery::DiscoveredGraph,
    pipeline::{RunSummary, SyncResult},
    resource::ResourceKey,
};

/// Severity tag attached to a free-text progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProgressLevel {
    #[default]
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub level: ProgressLevel,
    pub message: String,
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        ProgressEvent {
            level: ProgressLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        ProgressEvent {
            level: ProgressLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent {
            level: ProgressLevel::Error,
            message: message.into(),
        }
    }
}

impl Display for ProgressEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.level {
            ProgressLevel::Info => write!(f, "{}", self.message),
            ProgressLevel::Warning => write!(f, "Warning: {}", self.message),
            ProgressLevel::Error => write!(f, "Error: {}", self.message),
        }
    }
}

/// Messages emitted by discovery and sync workers toward the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Progress(ProgressEvent),
    /// Discovery completed; the graph is handed over read-only.
    DiscoveryFinished(Box<DiscoveredGraph>),
    /// Zero-based index of the node about to be synchronized, out of `total` selected nodes.
    NodeStarted {
        index: usize,
        total: usize,
        key: ResourceKey,
        name: String,
    },
    NodeFinished(SyncResult),
    RunFinished(RunSummary),
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Event::Progress(p) => write!(f, "Progress({p})"),
            Event::DiscoveryFinished(_) => write!(f, "DiscoveryFinished"),
            Event::NodeStarted { name, .. } => write!(f, "NodeStarted({name})"),
            Event::NodeFinished(r) => write!(f, "NodeFinished({})", r.name),
            Event::RunFinished(_) => write!(f, "RunFinished"),
        }
    }
}

/// Optional event sink shared by the discoverer and the executor.
pub type EventSender = Option<UnboundedSender<Event>>;

/// Log `progress` at its level and forward it to `tx`, if any. A dropped receiver is not an
/// error for the worker; the run continues.
pub(crate) fn report(tx: &EventSender, progress: ProgressEvent) {
    match progress.level {
        ProgressLevel::Info => tracing::info!("{}", progress.message),
        ProgressLevel::Warning => tracing::warn!("{}", progress.message),
        ProgressLevel::Error => tracing::error!("{}", progress.message),
    }
    send(tx, Event::Progress(progress));
}

pub(crate) fn send(tx: &EventSender, event: Event) {
    if let Some(tx) = tx {
        if let Err(e) = tx.send(event) {
            tracing::debug!("Event receiver dropped, discarding {}", e.0);
        }
    }
}
