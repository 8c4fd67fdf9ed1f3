//! Ordered, failure-isolated synchronization of documents.
//!
//! [`SyncExecutor`] runs the same staged pipeline against every selected document, one at a
//! time, in the order it is given:
//!
//! 1. open for editing
//! 2. force closed user partitions open (optional)
//! 3. reload every reference, one transaction each, with a pause in between (optional)
//! 4. refresh to the latest published state (optional, best effort)
//! 5. settle
//! 6. publish, relinquishing everything
//! 7. close without saving (optional, but always attempted once the open succeeded)
//!
//! A failing step ends that document's pipeline and is recorded on its [`SyncResult`]; the run
//! moves on to the next document. Partition and reference-reload problems are partial results,
//! not failures. A run always completes with a [`RunSummary`].

use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    error::SyncTreeError,
    event::{report, send, Event, EventSender, ProgressEvent},
    host::{RelinquishOptions, RemoteHost},
    resource::{ResourceKey, ResourceNode, WorksetMode},
};

/// Which optional stages run, and how long to pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOptions {
    /// Open with all partitions open (otherwise all closed).
    pub open_worksets: bool,
    /// Force every still-closed user partition open after opening.
    pub force_open_closed: bool,
    pub reload_links: bool,
    /// Pause after each reference reload.
    pub link_delay_secs: f64,
    pub reload_latest: bool,
    /// Pause before publishing.
    pub sync_delay_secs: f64,
    pub close_after: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        StageOptions {
            open_worksets: true,
            force_open_closed: true,
            reload_links: true,
            link_delay_secs: 2.0,
            reload_latest: true,
            sync_delay_secs: 1.0,
            close_after: true,
        }
    }
}

impl StageOptions {
    /// No pauses. Useful against hosts that do not need to settle.
    pub fn without_delays(mut self) -> Self {
        self.link_delay_secs = 0.0;
        self.sync_delay_secs = 0.0;
        self
    }

    pub fn link_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.link_delay_secs).unwrap_or(Duration::ZERO)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.sync_delay_secs).unwrap_or(Duration::ZERO)
    }

    pub fn validate(&self) -> Result<(), SyncTreeError> {
        for (name, secs) in [
            ("link_delay_secs", self.link_delay_secs),
            ("sync_delay_secs", self.sync_delay_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(SyncTreeError::Config(format!(
                    "{name} must be a non-negative number of seconds, got {secs}"
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of one document's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub key: ResourceKey,
    pub name: String,
    pub opened: bool,
    pub worksets_opened: usize,
    pub worksets_still_closed: usize,
    pub links_ok: Vec<String>,
    /// `(reference name, error message)`
    pub links_failed: Vec<(String, String)>,
    pub synced: bool,
    pub error: Option<String>,
}

impl SyncResult {
    fn new(key: ResourceKey, name: String) -> Self {
        SyncResult {
            key,
            name,
            opened: false,
            worksets_opened: 0,
            worksets_still_closed: 0,
            links_ok: Vec::new(),
            links_failed: Vec::new(),
            synced: false,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// One-line log rendering.
    pub fn summary_line(&self) -> String {
        match &self.error {
            None => format!(
                "OK    {}  (ws opened: {}, links: {}, link fails: {})",
                self.name,
                self.worksets_opened,
                self.links_ok.len(),
                self.links_failed.len()
            ),
            Some(e) => format!("FAIL  {}: {}", self.name, e),
        }
    }
}

/// Aggregate of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ok_count: usize,
    pub fail_count: usize,
    pub results: Vec<SyncResult>,
    /// Set when the run stopped early because it was cancelled between documents.
    pub cancelled: bool,
}

impl RunSummary {
    fn push(&mut self, result: SyncResult) {
        if result.is_ok() {
            self.ok_count += 1;
        } else {
            self.fail_count += 1;
        }
        self.results.push(result);
    }

    pub fn result(&self, key: &ResourceKey) -> Option<&SyncResult> {
        self.results.iter().find(|r| &r.key == key)
    }

    /// Pretty-printed JSON report of the run.
    pub fn to_json(&self) -> Result<String, SyncTreeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), SyncTreeError> {
        tracing::debug!("[Sync] Writing run report to {:?}", path.as_ref());
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn text(&self) -> String {
        let mut text = format!(
            "Done. {} succeeded, {} failed.",
            self.ok_count, self.fail_count
        );
        if self.cancelled {
            text.push_str(" (cancelled)");
        }
        text
    }
}

/// Cooperative cancellation, honored between documents only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Closes the wrapped handle exactly once when dropped, on every exit path of a document's
/// pipeline. With `close_after` unset the handle is released to the host session instead.
struct OpenGuard<'h, H: RemoteHost> {
    host: &'h H,
    handle: Option<H::Handle>,
    close: bool,
    name: &'h str,
}

impl<H: RemoteHost> OpenGuard<'_, H> {
    fn handle(&self) -> Option<&H::Handle> {
        self.handle.as_ref()
    }
}

impl<H: RemoteHost> Drop for OpenGuard<'_, H> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if !self.close {
            tracing::debug!("[Sync] Leaving {} open", self.name);
            return;
        }
        if let Err(e) = self.host.close_resource(handle, false) {
            tracing::warn!("[Sync] Failed to close {}: {}", self.name, e);
        }
    }
}

pub struct SyncExecutor<'h, H: RemoteHost> {
    host: &'h H,
    options: StageOptions,
    relinquish: RelinquishOptions,
    tx: EventSender,
    cancel: Option<CancelFlag>,
}

impl<'h, H: RemoteHost> SyncExecutor<'h, H> {
    pub fn new(host: &'h H, options: StageOptions, tx: EventSender) -> Self {
        SyncExecutor {
            host,
            options,
            relinquish: RelinquishOptions::all(),
            tx,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_relinquish(mut self, relinquish: RelinquishOptions) -> Self {
        self.relinquish = relinquish;
        self
    }

    pub fn options(&self) -> &StageOptions {
        &self.options
    }

    /// Synchronize every key of `ordered` that is in `selection`, in order.
    ///
    /// Names come from `nodes`; keys without a node are shown by abbreviated id.
    pub fn execute(
        &self,
        ordered: &[ResourceKey],
        selection: &HashSet<ResourceKey>,
        nodes: &[ResourceNode],
    ) -> RunSummary {
        let targets = ordered
            .iter()
            .filter(|k| selection.contains(*k))
            .map(|k| {
                let name = nodes
                    .iter()
                    .find(|n| &n.key == k)
                    .map(|n| n.name.clone())
                    .unwrap_or_else(|| k.short_id());
                (k.clone(), name)
            })
            .collect();
        self.run(targets)
    }

    /// Synchronize a fixed list of `(key, name)` pairs in the given order, without discovery.
    pub fn execute_manifest(&self, manifest: &[(ResourceKey, String)]) -> RunSummary {
        self.run(manifest.to_vec())
    }

    fn run(&self, targets: Vec<(ResourceKey, String)>) -> RunSummary {
        let total = targets.len();
        let mut summary = RunSummary::default();
        tracing::info!("[Sync] Starting run over {} document(s)", total);

        for (index, (key, name)) in targets.into_iter().enumerate() {
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                report(
                    &self.tx,
                    ProgressEvent::warning(format!(
                        "Cancelled before {}; {} document(s) not started",
                        name,
                        total - index
                    )),
                );
                summary.cancelled = true;
                break;
            }

            send(
                &self.tx,
                Event::NodeStarted {
                    index,
                    total,
                    key: key.clone(),
                    name: name.clone(),
                },
            );
            report(
                &self.tx,
                ProgressEvent::info(format!("Syncing {}/{}: {}", index + 1, total, name)),
            );

            let result = self.sync_node(key, name);
            let line = result.summary_line();
            if result.is_ok() {
                report(&self.tx, ProgressEvent::info(line));
            } else {
                report(&self.tx, ProgressEvent::error(line));
            }
            send(&self.tx, Event::NodeFinished(result.clone()));
            summary.push(result);
        }

        report(&self.tx, ProgressEvent::info(summary.text()));
        send(&self.tx, Event::RunFinished(summary.clone()));
        summary
    }

    /// Run the full pipeline for one document. Never fails; errors land in the result.
    pub fn sync_node(&self, key: ResourceKey, name: String) -> SyncResult {
        let mut result = SyncResult::new(key, name);
        let mode = WorksetMode::from_open_all(self.options.open_worksets);

        let handle = match self.host.open_resource(&result.key, mode) {
            Ok(handle) => handle,
            Err(e) => {
                result.error = Some(e.message());
                return result;
            }
        };
        result.opened = true;

        let name = result.name.clone();
        let guard = OpenGuard {
            host: self.host,
            handle: Some(handle),
            close: self.options.close_after,
            name: &name,
        };
        if let Some(handle) = guard.handle() {
            if let Err(e) = self.run_stages(handle, &mut result) {
                result.error = Some(e.message());
            }
        }
        drop(guard);
        result
    }

    fn run_stages(
        &self,
        handle: &H::Handle,
        result: &mut SyncResult,
    ) -> Result<(), SyncTreeError> {
        if self.options.force_open_closed {
            match self.host.force_open_closed_partitions(handle) {
                Ok(partitions) => {
                    result.worksets_opened = partitions.opened;
                    result.worksets_still_closed = partitions.still_closed;
                    if partitions.still_closed > 0 {
                        report(
                            &self.tx,
                            ProgressEvent::warning(format!(
                                "  {}: {} user workset(s) still closed",
                                result.name, partitions.still_closed
                            )),
                        );
                    }
                }
                Err(e) => report(
                    &self.tx,
                    ProgressEvent::warning(format!(
                        "  {}: could not open closed worksets: {}",
                        result.name,
                        e.message()
                    )),
                ),
            }
        }

        if self.options.reload_links {
            self.reload_links(handle, result);
        }

        if self.options.reload_latest {
            if let Err(e) = self.host.refresh_to_latest(handle) {
                tracing::debug!("[Sync] Ignoring refresh failure for {}: {}", result.name, e);
            }
        }

        pause(self.options.sync_delay());

        self.host.publish(handle, &self.relinquish)?;
        result.synced = true;
        Ok(())
    }

    fn reload_links(&self, handle: &H::Handle, result: &mut SyncResult) {
        let mut targets = match self.host.reloadable_references(handle) {
            Ok(targets) => targets,
            Err(e) => {
                report(
                    &self.tx,
                    ProgressEvent::warning(format!(
                        "  {}: could not list references to reload: {}",
                        result.name,
                        e.message()
                    )),
                );
                return;
            }
        };
        targets.sort_by(|a, b| a.name.cmp(&b.name));

        for target in targets.iter() {
            match self.host.reload_reference(handle, target) {
                Ok(()) => {
                    tracing::debug!("[Sync] Reloaded {} in {}", target.name, result.name);
                    result.links_ok.push(target.name.clone());
                }
                Err(e) => {
                    report(
                        &self.tx,
                        ProgressEvent::warning(format!(
                            "  {}: reload of {} failed: {}",
                            result.name,
                            target.name,
                            e.message()
                        )),
                    );
                    result.links_failed.push((target.name.clone(), e.message()));
                }
            }
            pause(self.options.link_delay());
        }
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
