// src/core/state/local.rs

//! The local file backend: the entire state document lives in one JSON
//! file, loaded into memory at startup. Mutations mark the cache dirty and
//! a debounced background flush performs an atomic rewrite (temp file +
//! rename), the same crash-safety shape as the teacher's SPLDB saver.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::core::errors::{ControllerError, Result};
use crate::core::state::cache::{Cache, CacheSnapshot};

const FLUSH_DEBOUNCE: Duration = Duration::from_secs(10);

/// Local, file-backed state storage. Owns the debounce/backup machinery;
/// the generic read/write API lives on [`crate::core::state::store::StateStore`].
pub struct LocalBackend {
    pub(crate) cache: Arc<Mutex<Cache>>,
    path: PathBuf,
    backup_dir: PathBuf,
    backup_retain_count: usize,
    flush_notify: Arc<Notify>,
    flush_scheduled: Arc<AtomicBool>,
}

impl LocalBackend {
    /// Loads the state document at `path` into memory, or starts empty if it
    /// does not exist yet, and spawns the debounced background flusher.
    pub async fn open(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, backup_retain_count: usize) -> Result<Self> {
        let path = path.into();
        let backup_dir = backup_dir.into();
        let cache = Arc::new(Mutex::new(load_cache(&path).await?));

        let backend = Self {
            cache,
            path,
            backup_dir,
            backup_retain_count,
            flush_notify: Arc::new(Notify::new()),
            flush_scheduled: Arc::new(AtomicBool::new(false)),
        };
        backend.spawn_flusher();
        Ok(backend)
    }

    fn spawn_flusher(&self) {
        let cache = self.cache.clone();
        let path = self.path.clone();
        let notify = self.flush_notify.clone();
        let scheduled = self.flush_scheduled.clone();
        tokio::spawn(async move {
            loop {
                notify.notified().await;
                tokio::time::sleep(FLUSH_DEBOUNCE).await;
                scheduled.store(false, Ordering::SeqCst);
                if let Err(e) = flush_once(&cache, &path).await {
                    error!(error = %e, "debounced state flush failed");
                }
            }
        });
    }

    /// Marks a flush as needed; collapses bursts of mutations into one
    /// write after `FLUSH_DEBOUNCE` of quiet.
    pub fn schedule_flush(&self) {
        if self
            .flush_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.flush_notify.notify_one();
        }
    }

    /// Bypasses the debounce window for operator-initiated actions.
    pub async fn flush_now(&self) -> Result<()> {
        flush_once(&self.cache, &self.path).await
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_stem().and_then(|s| s.to_str()).unwrap_or("state").to_string();
        name.push_str(suffix);
        self.path.with_file_name(name)
    }

    /// Directory migration logs are downloaded into, beside the state file.
    pub fn logs_dir(&self) -> PathBuf {
        self.path.with_file_name("migration-logs")
    }

    pub async fn read_worker_config(&self) -> Result<Option<crate::core::model::WorkerConfig>> {
        read_json_if_present(&self.sibling_path("-worker-config.json")).await
    }

    pub async fn write_worker_config(&self, config: &crate::core::model::WorkerConfig) -> Result<()> {
        write_json(&self.sibling_path("-worker-config.json"), config).await
    }

    pub async fn read_admin_config(&self) -> Result<Option<crate::core::model::AdminConfig>> {
        read_json_if_present(&self.sibling_path("-admin-config.json")).await
    }

    pub async fn write_admin_config(&self, config: &crate::core::model::AdminConfig) -> Result<()> {
        write_json(&self.sibling_path("-admin-config.json"), config).await
    }

    /// Copies the current state file into `backup_dir`, rotating out all
    /// but the `backup_retain_count` most recent backups. Intended to be
    /// called hourly by the caller (see §6 "backups rotated hourly").
    pub async fn rotate_backup(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let stamp = Utc::now().format("%Y-%m-%d-%H-%M");
        let backup_path = self.backup_dir.join(format!("migrations-state-{stamp}.json"));
        tokio::fs::copy(&self.path, &backup_path).await?;
        prune_backups(&self.backup_dir, self.backup_retain_count).await?;
        Ok(())
    }
}

async fn load_cache(path: &Path) -> Result<Cache> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let snapshot: CacheSnapshot = serde_json::from_slice(&bytes)?;
            info!(path = %path.display(), syncs = snapshot.syncs.len(), repos = snapshot.repos.len(), "loaded state document");
            Ok(Cache::from_snapshot(snapshot))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no existing state document, starting empty");
            Ok(Cache::new())
        }
        Err(e) => Err(e.into()),
    }
}

async fn flush_once(cache: &Arc<Mutex<Cache>>, path: &Path) -> Result<()> {
    let (snapshot, was_dirty) = {
        let mut guard = cache.lock().await;
        let dirty = guard.is_dirty();
        let snapshot = guard.snapshot();
        guard.clear_dirty();
        (snapshot, dirty)
    };
    if !was_dirty {
        return Ok(());
    }
    write_atomic(path, &snapshot).await?;
    debug!(path = %path.display(), "flushed state document");
    Ok(())
}

async fn write_atomic(path: &Path, snapshot: &CacheSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let tmp_path = path.with_extension(format!("tmp.{}", rand::random::<u32>()));
    if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        error!(path = %path.display(), "atomic rename of state document failed: {e}");
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(ControllerError::Persistence(format!(
            "failed to rename temporary state file into place: {e}"
        )));
    }
    Ok(())
}

async fn read_json_if_present<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

async fn prune_backups(backup_dir: &Path, retain_count: usize) -> Result<()> {
    let mut entries = tokio::fs::read_dir(backup_dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    if names.len() > retain_count {
        let excess = names.len() - retain_count;
        for name in &names[..excess] {
            if let Err(e) = tokio::fs::remove_file(backup_dir.join(name)).await {
                warn!(backup = name, "failed to prune old state backup: {e}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{HostEndpoint, SyncConfig, SyncId};

    #[tokio::test]
    async fn open_with_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path().join("state.json"), dir.path().join("backups"), 24)
            .await
            .unwrap();
        assert!(backend.cache.lock().await.list_syncs().is_empty());
    }

    #[tokio::test]
    async fn flush_now_writes_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let backend = LocalBackend::open(&path, dir.path().join("backups"), 24)
            .await
            .unwrap();
        let endpoint = HostEndpoint::derive(None, "acme", false);
        let now = Utc::now();
        let sync = SyncConfig {
            id: SyncId::new(),
            name: "acme-mirror".into(),
            source: endpoint.clone(),
            target: endpoint,
            created_at: now,
            updated_at: now,
            last_synced_at: None,
            enabled: true,
            archived: false,
        };
        backend.cache.lock().await.upsert_sync(sync.clone());
        backend.flush_now().await.unwrap();

        let reloaded = load_cache(&path).await.unwrap();
        assert_eq!(reloaded.get_sync(&sync.id).unwrap().name, "acme-mirror");
    }

    #[tokio::test]
    async fn rotate_backup_retains_only_recent_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let backup_dir = dir.path().join("backups");
        let backend = LocalBackend::open(&path, &backup_dir, 2).await.unwrap();
        backend.flush_now().await.unwrap();
        tokio::fs::create_dir_all(&backup_dir).await.unwrap();
        for name in ["migrations-state-2024-01-01-00-00.json", "migrations-state-2024-01-01-01-00.json", "migrations-state-2024-01-01-02-00.json"] {
            tokio::fs::write(backup_dir.join(name), b"{}").await.unwrap();
        }
        prune_backups(&backup_dir, 2).await.unwrap();
        let mut remaining = Vec::new();
        let mut entries = tokio::fs::read_dir(&backup_dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            remaining.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(remaining.len(), 2);
    }
}
