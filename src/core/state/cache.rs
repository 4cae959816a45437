// src/core/state/cache.rs

//! The in-memory authoritative cache of every [`SyncConfig`] and
//! [`RepoRecord`]. Both state backends wrap one `Cache` behind a single
//! `Mutex`: the read-decide-write sequences the workers need (admission
//! control, status-change side effects) require atomicity a lock-free map
//! cannot provide without an outer lock anyway.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::model::{RepoId, RepoRecord, RepoStatus, SyncConfig, SyncId};

/// A state document's in-memory contents, serializable as-is for the local
/// backend's JSON file.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub syncs: HashMap<String, SyncConfig>,
    pub repos: HashMap<String, RepoRecord>,
}

pub const STATE_DOCUMENT_VERSION: u32 = 2;

#[derive(Default)]
pub struct Cache {
    syncs: HashMap<SyncId, SyncConfig>,
    repos: HashMap<RepoId, RepoRecord>,
    dirty: bool,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let syncs = snapshot
            .syncs
            .into_values()
            .map(|s| (s.id.clone(), s))
            .collect();
        let repos = snapshot
            .repos
            .into_values()
            .map(|r| (r.id.clone(), r))
            .collect();
        Self {
            syncs,
            repos,
            dirty: false,
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            version: STATE_DOCUMENT_VERSION,
            syncs: self
                .syncs
                .values()
                .map(|s| (s.id.0.clone(), s.clone()))
                .collect(),
            repos: self
                .repos
                .values()
                .map(|r| (r.id.0.clone(), r.clone()))
                .collect(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // --- Sync reads/writes -------------------------------------------------

    pub fn get_sync(&self, id: &SyncId) -> Option<SyncConfig> {
        self.syncs.get(id).cloned()
    }

    pub fn list_syncs(&self) -> Vec<SyncConfig> {
        self.syncs.values().cloned().collect()
    }

    pub fn upsert_sync(&mut self, sync: SyncConfig) {
        self.syncs.insert(sync.id.clone(), sync);
        self.mark_dirty();
    }

    pub fn delete_sync(&mut self, id: &SyncId) -> Option<SyncConfig> {
        self.repos.retain(|_, r| &r.sync_id != id);
        let removed = self.syncs.remove(id);
        self.mark_dirty();
        removed
    }

    /// Archives `id` and cascades `archived=true` to every owned record.
    /// Returns `false` if the sync does not exist.
    pub fn archive_sync(&mut self, id: &SyncId) -> bool {
        let Some(sync) = self.syncs.get_mut(id) else {
            return false;
        };
        sync.archived = true;
        sync.enabled = false;
        for repo in self.repos.values_mut() {
            if repo.sync_id == *id {
                repo.archived = true;
            }
        }
        self.mark_dirty();
        true
    }

    /// Unarchives `id` and cascades `archived=false` to every owned record.
    pub fn unarchive_sync(&mut self, id: &SyncId) -> bool {
        let Some(sync) = self.syncs.get_mut(id) else {
            return false;
        };
        sync.archived = false;
        for repo in self.repos.values_mut() {
            if repo.sync_id == *id {
                repo.archived = false;
            }
        }
        self.mark_dirty();
        true
    }

    /// Transitions every non-archived record of `id` to `unknown`, clearing
    /// `migrationId` so Progress never polls a job that belonged to the
    /// pre-change classification.
    pub fn invalidate_classification(&mut self, id: &SyncId) {
        for repo in self.repos.values_mut() {
            if repo.sync_id == *id && !repo.archived && repo.status != RepoStatus::Deleted {
                repo.status = RepoStatus::Unknown;
                repo.migration_id = None;
                repo.last_update = Utc::now();
            }
        }
        self.mark_dirty();
    }

    // --- Repo reads/writes --------------------------------------------------

    pub fn get_repo(&self, id: &RepoId) -> Option<RepoRecord> {
        self.repos.get(id).cloned()
    }

    pub fn find_by_sync_and_name(&self, sync_id: &SyncId, name: &str) -> Option<RepoRecord> {
        self.repos
            .values()
            .find(|r| &r.sync_id == sync_id && r.name == name && !r.archived)
            .cloned()
    }

    pub fn list_repos(&self) -> Vec<RepoRecord> {
        self.repos.values().cloned().collect()
    }

    pub fn list_repos_by_sync(&self, sync_id: &SyncId) -> Vec<RepoRecord> {
        self.repos
            .values()
            .filter(|r| &r.sync_id == sync_id)
            .cloned()
            .collect()
    }

    pub fn list_active_repos(&self, sync_id: &SyncId) -> Vec<RepoRecord> {
        self.repos
            .values()
            .filter(|r| &r.sync_id == sync_id && !r.archived)
            .cloned()
            .collect()
    }

    /// Count of records with `status ∈ {queued, syncing}` across all syncs,
    /// re-derived live per §5 ("reread the state immediately before each
    /// enqueue, not from a cached count").
    pub fn count_in_flight(&self) -> usize {
        self.repos.values().filter(|r| r.status.is_in_flight()).count()
    }

    pub fn list_incomplete_repos(&self) -> Vec<RepoRecord> {
        self.repos
            .values()
            .filter(|r| r.status.is_in_flight())
            .cloned()
            .collect()
    }

    pub fn upsert_repo(&mut self, repo: RepoRecord) {
        self.repos.insert(repo.id.clone(), repo);
        self.mark_dirty();
    }

    /// Applies spec.md §4.1's status-change side effects, then stores the
    /// updated record. Returns the updated record, or `None` if `id` is
    /// unknown.
    pub fn set_status(
        &mut self,
        id: &RepoId,
        status: RepoStatus,
        err: Option<String>,
    ) -> Option<RepoRecord> {
        let repo = self.repos.get_mut(id)?;
        let now = Utc::now();
        repo.status = status;
        repo.last_update = now;
        if let Some(message) = err.filter(|e| !e.is_empty()) {
            repo.error_message = Some(message);
        }

        if status == RepoStatus::Syncing && repo.started_at.is_none() {
            repo.started_at = Some(now);
        }

        let mut synced_at_for_sync: Option<(SyncId, DateTime<Utc>)> = None;
        if status.is_terminal() && repo.ended_at.is_none() {
            repo.ended_at = Some(now);
            let elapsed = repo
                .started_at
                .map(|started| (now - started).num_seconds())
                .unwrap_or(0);
            repo.elapsed_seconds = Some(elapsed);
            if status == RepoStatus::Synced {
                synced_at_for_sync = Some((repo.sync_id.clone(), now));
            }
        }

        let updated = repo.clone();
        if let Some((sync_id, synced_at)) = synced_at_for_sync
            && let Some(sync) = self.syncs.get_mut(&sync_id)
        {
            sync.last_synced_at = Some(synced_at);
        }
        self.mark_dirty();
        Some(updated)
    }
}
