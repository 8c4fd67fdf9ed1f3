//! Interactive driver for discovery and synchronization.
//!
//! ## State machine
//!
//! [`WizardState`] is a plain value moved from step to step:
//!
//! ```text
//! SelectRoot ──start_discovery──► Discovering ──DiscoveryFinished──► Review
//!     ▲                                                               │
//!     │                                                        begin_sync
//!     │                                                               ▼
//!  (restart) ◄──────────── Finished ◄──────RunFinished────────── Syncing
//! ```
//!
//! Every transition takes the state by value and returns the next one. Worker [`Event`]s are
//! applied with [`WizardState::apply`]; events that do not belong to the current step are
//! ignored.
//!
//! ## Threading
//!
//! [`Controller`] runs discovery and synchronization on dedicated worker threads. Workers only
//! send events; the controller owns the sole receiver and is the only code that touches the
//! state. Call [`Controller::pump`] from the driving thread to apply pending events without
//! blocking, or [`Controller::wait`] to block until the current job is done.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
    thread::JoinHandle,
};
use tokio::sync::mpsc::{error::TryRecvError, unbounded_channel, UnboundedReceiver};

use crate::{
    discovery::{discover, format_tree, DiscoveredGraph, TreeLine, DEFAULT_ROOT_NAME},
    error::SyncTreeError,
    event::{Event, ProgressEvent},
    host::RemoteHost,
    pipeline::{CancelFlag, RunSummary, StageOptions, SyncExecutor},
    plan::{sync_order, SyncOrder},
    resource::{ResourceKey, ResourceNode},
};

/// Where the root document's identifiers come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootSource {
    /// The document currently open in the host session.
    Active { name: Option<String> },
    /// Identifiers typed in by the operator.
    Manual {
        region: String,
        collection_id: String,
        resource_id: String,
        name: String,
    },
}

impl RootSource {
    /// Resolve to a validated key and display name.
    pub fn resolve<H: RemoteHost>(
        &self,
        host: &H,
        active: Option<&H::Handle>,
    ) -> Result<(ResourceKey, String), SyncTreeError> {
        match self {
            RootSource::Manual {
                region,
                collection_id,
                resource_id,
                name,
            } => {
                let key = ResourceKey::parse(region, collection_id, resource_id)?;
                Ok((key, display_name(name)))
            }
            RootSource::Active { name } => {
                let handle = active.ok_or_else(|| {
                    SyncTreeError::NotFound("no active document".to_string())
                })?;
                let key = host.identify(handle).map_err(|e| {
                    SyncTreeError::InvalidKey(format!(
                        "active document does not appear to be a cloud model: {}",
                        e.message()
                    ))
                })?;
                key.validate()?;
                Ok((key, display_name(name.as_deref().unwrap_or_default())))
            }
        }
    }
}

fn display_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        DEFAULT_ROOT_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// Everything a sync worker needs, detached from the wizard state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub ordered: Vec<ResourceKey>,
    pub selection: HashSet<ResourceKey>,
    pub nodes: Vec<ResourceNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum WizardState {
    #[default]
    SelectRoot,
    Discovering {
        root: ResourceKey,
        root_name: String,
        status: String,
        log: Vec<ProgressEvent>,
    },
    Review {
        graph: DiscoveredGraph,
        order: SyncOrder,
        tree: Vec<TreeLine>,
        selection: BTreeSet<ResourceKey>,
        /// Reference cycles found in the graph. The order is still usable.
        warnings: Vec<String>,
        log: Vec<ProgressEvent>,
    },
    Syncing {
        total: usize,
        done: usize,
        status: String,
        log: Vec<ProgressEvent>,
    },
    Finished {
        summary: RunSummary,
        log: Vec<ProgressEvent>,
    },
    /// A worker went away without reporting completion.
    Failed { message: String },
}

/// A transition that was not allowed. Carries the unchanged state back.
#[derive(Debug)]
pub struct Rejected {
    pub state: WizardState,
    pub error: SyncTreeError,
}

impl WizardState {
    pub fn step(&self) -> &'static str {
        match self {
            WizardState::SelectRoot => "SelectRoot",
            WizardState::Discovering { .. } => "Discovering",
            WizardState::Review { .. } => "Review",
            WizardState::Syncing { .. } => "Syncing",
            WizardState::Finished { .. } => "Finished",
            WizardState::Failed { .. } => "Failed",
        }
    }

    /// Whether a worker is expected to be producing events for this step.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            WizardState::Discovering { .. } | WizardState::Syncing { .. }
        )
    }

    pub fn start_discovery(self, root: ResourceKey, root_name: String) -> Result<Self, Rejected> {
        if self.is_busy() {
            let error = SyncTreeError::Config(format!("cannot discover while {}", self.step()));
            return Err(Rejected { state: self, error });
        }
        Ok(WizardState::Discovering {
            root,
            status: "Opening linked models (detached) to discover tree…".to_string(),
            root_name,
            log: Vec::new(),
        })
    }

    /// Include or exclude one node from the sync. No effect outside `Review`.
    pub fn with_selected(self, key: &ResourceKey, selected: bool) -> Self {
        match self {
            WizardState::Review {
                graph,
                order,
                tree,
                mut selection,
                warnings,
                log,
            } => {
                if selected && order.position(key).is_some() {
                    selection.insert(key.clone());
                } else if !selected {
                    selection.remove(key);
                }
                WizardState::Review {
                    graph,
                    order,
                    tree,
                    selection,
                    warnings,
                    log,
                }
            }
            other => other,
        }
    }

    /// Selected keys in sync order.
    pub fn selected_order(&self) -> Vec<ResourceKey> {
        match self {
            WizardState::Review {
                order, selection, ..
            } => order
                .iter()
                .filter(|k| selection.contains(*k))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn begin_sync(self) -> Result<(Self, SyncJob), Rejected> {
        match self {
            WizardState::Review {
                graph,
                order,
                selection,
                ..
            } if !selection.is_empty() => {
                let job = SyncJob {
                    ordered: order.into_iter().collect(),
                    selection: selection.into_iter().collect(),
                    nodes: graph.nodes,
                };
                let state = WizardState::Syncing {
                    total: job.selection.len(),
                    done: 0,
                    status: "Starting…".to_string(),
                    log: Vec::new(),
                };
                Ok((state, job))
            }
            state @ WizardState::Review { .. } => Err(Rejected {
                state,
                error: SyncTreeError::Config("No models selected.".to_string()),
            }),
            state => {
                let error =
                    SyncTreeError::Config(format!("cannot start sync from {}", state.step()));
                Err(Rejected { state, error })
            }
        }
    }

    /// Apply one worker event.
    pub fn apply(self, event: Event) -> Self {
        match (self, event) {
            (
                WizardState::Discovering {
                    root,
                    root_name,
                    mut log,
                    ..
                },
                Event::Progress(progress),
            ) => {
                let status = progress.message.trim().to_string();
                log.push(progress);
                WizardState::Discovering {
                    root,
                    root_name,
                    status,
                    log,
                }
            }
            (WizardState::Discovering { log, .. }, Event::DiscoveryFinished(graph)) => {
                WizardState::review(*graph, log)
            }
            (
                WizardState::Syncing {
                    total,
                    done,
                    status,
                    mut log,
                },
                Event::Progress(progress),
            ) => {
                log.push(progress);
                WizardState::Syncing {
                    total,
                    done,
                    status,
                    log,
                }
            }
            (
                WizardState::Syncing {
                    done, log, ..
                },
                Event::NodeStarted {
                    index, total, name, ..
                },
            ) => WizardState::Syncing {
                total,
                done,
                status: format!("Syncing {}/{}: {}", index + 1, total, name),
                log,
            },
            (
                WizardState::Syncing {
                    total,
                    done,
                    status,
                    log,
                },
                Event::NodeFinished(_),
            ) => WizardState::Syncing {
                total,
                done: done + 1,
                status,
                log,
            },
            (WizardState::Syncing { log, .. }, Event::RunFinished(summary)) => {
                WizardState::Finished { summary, log }
            }
            (state, event) => {
                tracing::debug!("[Controller] Ignoring {} during {}", event, state.step());
                state
            }
        }
    }

    fn review(graph: DiscoveredGraph, mut log: Vec<ProgressEvent>) -> Self {
        let order = sync_order(&graph.adjacency, &graph.nodes);
        let warnings: Vec<String> = order
            .cycles(&graph.adjacency)
            .iter()
            .map(|cycle| {
                let names: Vec<String> = cycle.iter().map(|k| graph.display_name(k)).collect();
                format!(
                    "Reference cycle between {}; synced in first-encountered order",
                    names.join(", ")
                )
            })
            .collect();
        for warning in warnings.iter() {
            tracing::warn!("[Controller] {}", warning);
            log.push(ProgressEvent::warning(warning.clone()));
        }
        log.push(ProgressEvent::info(format!("Found {} model(s).", order.len())));
        let tree = format_tree(&graph);
        let selection = order.iter().cloned().collect();
        WizardState::Review {
            graph,
            order,
            tree,
            selection,
            warnings,
            log,
        }
    }
}

/// Owns the wizard state, the worker threads and the event receiver.
pub struct Controller<H> {
    host: Arc<H>,
    options: StageOptions,
    state: WizardState,
    rx: Option<UnboundedReceiver<Event>>,
    worker: Option<JoinHandle<()>>,
    cancel: CancelFlag,
}

impl<H> Controller<H>
where
    H: RemoteHost + Send + Sync + 'static,
{
    /// Stage options are validated here, before any work starts.
    pub fn new(host: Arc<H>, options: StageOptions) -> Result<Self, SyncTreeError> {
        options.validate()?;
        Ok(Controller {
            host,
            options,
            state: WizardState::SelectRoot,
            rx: None,
            worker: None,
            cancel: CancelFlag::new(),
        })
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn start_discovery(
        &mut self,
        root: ResourceKey,
        root_name: String,
    ) -> Result<(), SyncTreeError> {
        root.validate()?;
        let state = std::mem::take(&mut self.state);
        let state = self.accept(state.start_discovery(root.clone(), root_name.clone()))?;
        self.state = state;

        let (tx, rx) = unbounded_channel();
        let host = Arc::clone(&self.host);
        self.spawn_worker("synctree-discovery", rx, move || {
            discover(host.as_ref(), root, &root_name, None, Some(tx));
        })
    }

    /// Include or exclude a discovered node before syncing.
    pub fn set_selected(&mut self, key: &ResourceKey, selected: bool) {
        let state = std::mem::take(&mut self.state);
        self.state = state.with_selected(key, selected);
    }

    pub fn start_sync(&mut self) -> Result<(), SyncTreeError> {
        let state = std::mem::take(&mut self.state);
        let (state, job) = self.accept(state.begin_sync())?;
        self.state = state;

        self.cancel = CancelFlag::new();
        let (tx, rx) = unbounded_channel();
        let host = Arc::clone(&self.host);
        let options = self.options.clone();
        let cancel = self.cancel.clone();
        self.spawn_worker("synctree-sync", rx, move || {
            SyncExecutor::new(host.as_ref(), options, Some(tx))
                .with_cancel(cancel)
                .execute(&job.ordered, &job.selection, &job.nodes);
        })
    }

    /// Stop the running sync before its next document.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Apply every event already received. Returns the number applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return applied;
            };
            match rx.try_recv() {
                Ok(event) => {
                    self.apply(event);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => return applied,
                Err(TryRecvError::Disconnected) => {
                    self.finish_job();
                    return applied;
                }
            }
        }
    }

    /// Block until the current worker finishes, applying its events.
    pub fn wait(&mut self) -> &WizardState {
        while let Some(rx) = self.rx.as_mut() {
            match rx.blocking_recv() {
                Some(event) => self.apply(event),
                None => self.finish_job(),
            }
        }
        &self.state
    }

    fn spawn_worker<F>(
        &mut self,
        name: &str,
        rx: UnboundedReceiver<Event>,
        work: F,
    ) -> Result<(), SyncTreeError>
    where
        F: FnOnce() + Send + 'static,
    {
        match std::thread::Builder::new().name(name.to_string()).spawn(work) {
            Ok(handle) => {
                tracing::debug!("[Controller] Started {} worker", self.state.step());
                self.rx = Some(rx);
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                let message = format!("could not start {name}: {e}");
                self.state = WizardState::Failed {
                    message: message.clone(),
                };
                Err(SyncTreeError::Io(message))
            }
        }
    }

    fn apply(&mut self, event: Event) {
        let state = std::mem::take(&mut self.state);
        self.state = state.apply(event);
    }

    fn finish_job(&mut self) {
        self.rx = None;
        let panicked = self
            .worker
            .take()
            .map(|handle| handle.join().is_err())
            .unwrap_or(false);
        if self.state.is_busy() {
            let message = if panicked {
                format!("{} worker panicked", self.state.step())
            } else {
                format!("{} worker stopped before completing", self.state.step())
            };
            tracing::error!("[Controller] {}", message);
            self.state = WizardState::Failed { message };
        }
    }

    fn accept<T>(&mut self, transition: Result<T, Rejected>) -> Result<T, SyncTreeError> {
        transition.map_err(|rejected| {
            self.state = rejected.state;
            rejected.error
        })
    }
}
