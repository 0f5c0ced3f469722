//! Drives passes for the daemon: routes watcher events to projects and runs
//! one pass at a time on the blocking pool.

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use sync_core::{
    Actor, DocumentStore, HookedStore, ProjectNode, SyncContext, SyncEngine, SyncReport,
};

use crate::json_store::JsonFileStore;
use crate::watcher::FileWatcher;

pub type DaemonStore = HookedStore<JsonFileStore>;

pub struct Runner {
    engine: Arc<SyncEngine>,
    store: DaemonStore,
    actor: Actor,
}

impl Runner {
    pub fn new(engine: Arc<SyncEngine>, store: JsonFileStore) -> Self {
        let actor = Actor::system(&engine.config().git_identity);
        Self {
            store: HookedStore::new(store, engine.clone()),
            engine,
            actor,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn store(&self) -> &DaemonStore {
        &self.store
    }

    /// A fresh context for one operation, attributed to the service identity.
    pub fn context(&self) -> SyncContext {
        SyncContext::new(self.actor.clone())
    }

    /// Every project, parents before children.
    pub fn all_projects(&self) -> Result<Vec<ProjectNode>> {
        let mut found = Vec::new();
        let mut pending = self.store.root_projects()?;
        pending.reverse();
        while let Some(project) = pending.pop() {
            let mut children = self.store.child_projects(&project.identifier)?;
            children.reverse();
            found.push(project);
            pending.extend(children);
        }
        Ok(found)
    }

    pub fn sync_project(&self, identifier: &str) -> SyncReport {
        let ctx = self.context();
        let report = self.engine.sync_from_filesystem(&self.store, &ctx, identifier);
        log_report(identifier, &report);
        report
    }

    pub fn sync_all(&self) -> Result<Vec<(String, SyncReport)>> {
        Ok(self
            .all_projects()?
            .into_iter()
            .map(|p| {
                let report = self.sync_project(&p.identifier);
                (p.identifier, report)
            })
            .collect())
    }

    /// The project owning `relative` (relative to the base path): the one
    /// whose folder is the longest prefix of it.
    pub fn project_for_path(&self, relative: &Path) -> Result<Option<String>> {
        let absolute = self.engine.config().base_path.join(relative);
        let mut best: Option<(usize, String)> = None;
        for project in self.all_projects()? {
            let storage = self.engine.storage(&project);
            let folder = storage.project_path();
            if !absolute.starts_with(folder) {
                continue;
            }
            let depth = folder.components().count();
            if best.as_ref().is_none_or(|(d, _)| depth > *d) {
                best = Some((depth, project.identifier));
            }
        }
        Ok(best.map(|(_, identifier)| identifier))
    }

    /// Watch the base path until Ctrl+C, syncing the projects touched by each
    /// burst of events, plus everything on `interval` if set.
    pub async fn run(
        self: Arc<Self>,
        mut watcher: FileWatcher,
        interval: Option<Duration>,
    ) -> Result<()> {
        self.clone().sync_all_blocking().await;

        let mut ticker = interval.map(|period| {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        info!("Watching {}. Press Ctrl+C to stop.", watcher.base_path().display());
        loop {
            tokio::select! {
                Some(event) = watcher.event_rx().recv() => {
                    let mut touched = BTreeSet::new();
                    self.route(&event.path, &mut touched);
                    while let Ok(event) = watcher.event_rx().try_recv() {
                        self.route(&event.path, &mut touched);
                    }
                    for identifier in touched {
                        let runner = self.clone();
                        let pass =
                            tokio::task::spawn_blocking(move || runner.sync_project(&identifier));
                        if let Err(e) = pass.await {
                            error!("Sync task failed: {}", e);
                        }
                    }
                }

                _ = next_tick(&mut ticker) => {
                    debug!("Periodic sync");
                    self.clone().sync_all_blocking().await;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    fn route(&self, relative: &Path, touched: &mut BTreeSet<String>) {
        match self.project_for_path(relative) {
            Ok(Some(identifier)) => {
                touched.insert(identifier);
            }
            Ok(None) => debug!("{} belongs to no project", relative.display()),
            Err(e) => warn!("Cannot route {}: {}", relative.display(), e),
        }
    }

    async fn sync_all_blocking(self: Arc<Self>) {
        match tokio::task::spawn_blocking(move || self.sync_all()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Sync of all projects failed: {}", e),
            Err(e) => error!("Sync task failed: {}", e),
        }
    }
}

/// Resolves on the next tick, or never without an interval.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_report(identifier: &str, report: &SyncReport) {
    if report.disabled {
        debug!("Sync disabled for {}", identifier);
        return;
    }
    for pending in &report.pending {
        info!("Pending in {}: {} ({})", identifier, pending.file, pending.reasons.join(", "));
    }
    for conflict in &report.conflicts {
        warn!("Conflict in {}: '{}' {}", identifier, conflict.title, conflict.reason);
    }
    for file in &report.locked {
        warn!("Skipped locked file in {}: {}", identifier, file);
    }
    for err in &report.errors {
        error!("Error in {}: {}", identifier, err);
    }
}
