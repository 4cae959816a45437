// src/core/tasks/discovery.rs

//! The Discovery Worker: for each enabled sync, lists the source
//! organization's repositories and reconciles the state — archiving
//! vanished records, creating new ones in `unknown`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

use crate::core::errors::ControllerError;
use crate::core::metrics::{DISCOVERY_ERRORS_TOTAL, WORKER_TICKS_TOTAL};
use crate::core::model::{RepoRecord, RepoStatus, SyncConfig, WorkerConfig};
use crate::core::provider::ProviderClient;
use crate::core::state::StateStore;
use crate::core::tasks::generation::Generation;
use crate::core::tasks::handle::{WorkerCommand, WorkerStatus};

pub struct DiscoveryWorker {
    store: Arc<StateStore>,
    provider: Arc<dyn ProviderClient>,
    worker_config: Arc<RwLock<WorkerConfig>>,
    status: WorkerStatus,
    generation: Arc<Generation>,
}

impl DiscoveryWorker {
    pub fn new(
        store: Arc<StateStore>,
        provider: Arc<dyn ProviderClient>,
        worker_config: Arc<RwLock<WorkerConfig>>,
        status: WorkerStatus,
        generation: Arc<Generation>,
    ) -> Self {
        Self {
            store,
            provider,
            worker_config,
            status,
            generation,
        }
    }

    pub async fn run(self, mut commands: watch::Receiver<WorkerCommand>) {
        loop {
            if !self.status.is_running() {
                match commands.changed().await {
                    Ok(()) => {
                        let command = *commands.borrow_and_update();
                        match command {
                            WorkerCommand::Start | WorkerCommand::RunNow => self.status.set_running(true),
                            WorkerCommand::Stop => continue,
                        }
                    }
                    Err(_) => return,
                }
            }

            let my_generation = self.generation.current();
            self.run_all_syncs().await;
            self.status.record_run().await;

            let interval_minutes = self.worker_config.read().await.discovery.run_interval_minutes;
            let next_at = Utc::now() + chrono::Duration::minutes(interval_minutes as i64);
            self.status.set_next_run_at(Some(next_at)).await;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval_minutes as u64 * 60)) => {}
                changed = commands.changed() => {
                    match changed {
                        Ok(()) => {
                            if *commands.borrow_and_update() == WorkerCommand::Stop {
                                self.status.set_running(false);
                            }
                        }
                        Err(_) => return,
                    }
                }
            }

            if !self.generation.is_current(my_generation) {
                continue;
            }
        }
    }

    async fn run_all_syncs(&self) {
        for sync in self.store.list_syncs().await {
            if !sync.enabled || sync.archived {
                continue;
            }
            self.status.set_current(Some(sync.name.clone())).await;
            WORKER_TICKS_TOTAL.with_label_values(&["discovery"]).inc();
            if let Err(e) = self.run_one_sync(&sync).await {
                DISCOVERY_ERRORS_TOTAL.inc();
                error!(sync = %sync.name, error = %e, "discovery iteration failed");
                if matches!(e, ControllerError::NotFound(_)) {
                    let message = format!("source organization not found: {e}");
                    for repo in self.store.list_active_repos(&sync.id).await {
                        let _ = self.store.set_status(&repo.id, RepoStatus::Failed, Some(message.clone())).await;
                    }
                }
            }
        }
        self.status.set_current(None).await;
    }

    async fn run_one_sync(&self, sync: &SyncConfig) -> crate::core::errors::Result<()> {
        let Some(view) = self.store.runtime_view(&sync.id).await? else {
            return Ok(());
        };
        let Some(token) = view.source_token else {
            warn!(sync = %sync.name, "discovery skipped: no source token configured");
            return Ok(());
        };

        let discovered = self.provider.list_org_repos(&sync.source, &token).await?;
        let discovered: Vec<_> = discovered.into_iter().filter(|r| !r.is_disabled).collect();
        let names: HashSet<&str> = discovered.iter().map(|r| r.name.as_str()).collect();

        let existing = self.store.list_active_repos(&sync.id).await;
        let existing_names: HashSet<String> = existing.iter().map(|r| r.name.clone()).collect();

        for repo in existing {
            if repo.status != crate::core::model::RepoStatus::Deleted && !names.contains(repo.name.as_str()) {
                let mut archived = repo.clone();
                archived.archived = true;
                archived.last_update = Utc::now();
                self.store.upsert_repo(archived).await?;
            }
        }

        let now = Utc::now();
        let mut created = 0;
        for repo in &discovered {
            if !existing_names.contains(&repo.name) {
                let record = RepoRecord::new(sync.id.clone(), repo.name.clone(), repo.visibility, now);
                self.store.upsert_repo(record).await?;
                created += 1;
            }
        }
        info!(sync = %sync.name, discovered = discovered.len(), created, "discovery iteration complete");
        Ok(())
    }
}
