// src/core/secrets.rs

//! The Secret Store: per-sync credential pairs, kept separate from the
//! State Store and cached in-process with a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::errors::Result;
use crate::core::model::SyncId;

/// A source/target credential pair for one sync.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SyncCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_token: Option<String>,
}

/// The on-the-wire shape of the single encrypted parameter holding every
/// sync's credentials.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SecretsDocument {
    #[serde(default)]
    pub syncs: HashMap<String, SyncCredentials>,
}

/// Backing store for the encrypted secrets blob. An absent parameter is
/// treated as an empty document, never as an error.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn load(&self) -> Result<SecretsDocument>;
    async fn save(&self, doc: &SecretsDocument) -> Result<()>;
}

struct Cached {
    doc: SecretsDocument,
    fetched_at: Instant,
}

/// Caches the secrets document for `ttl`, refreshing it transparently on
/// the next read once expired.
pub struct SecretStore {
    backend: Arc<dyn SecretBackend>,
    ttl: Duration,
    cache: RwLock<Option<Cached>>,
}

impl SecretStore {
    pub fn new(backend: Arc<dyn SecretBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cache: RwLock::new(None),
        }
    }

    async fn document(&self) -> Result<SecretsDocument> {
        {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref()
                && cached.fetched_at.elapsed() < self.ttl
            {
                return Ok(cached.doc.clone());
            }
        }
        let doc = self.backend.load().await?;
        debug!("refreshed secrets document from backend");
        let mut guard = self.cache.write().await;
        *guard = Some(Cached {
            doc: doc.clone(),
            fetched_at: Instant::now(),
        });
        Ok(doc)
    }

    pub async fn get(&self, sync_id: &SyncId) -> Result<SyncCredentials> {
        let doc = self.document().await?;
        Ok(doc.syncs.get(&sync_id.0).cloned().unwrap_or_default())
    }

    /// Stores a sync's credentials, bypassing the cache's staleness window so
    /// a credential update via the API is immediately visible.
    pub async fn put(&self, sync_id: &SyncId, creds: SyncCredentials) -> Result<()> {
        let mut doc = self.document().await?;
        doc.syncs.insert(sync_id.0.clone(), creds);
        self.backend.save(&doc).await?;
        let mut guard = self.cache.write().await;
        *guard = Some(Cached {
            doc,
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    pub async fn remove(&self, sync_id: &SyncId) -> Result<()> {
        let mut doc = self.document().await?;
        doc.syncs.remove(&sync_id.0);
        self.backend.save(&doc).await?;
        let mut guard = self.cache.write().await;
        *guard = Some(Cached {
            doc,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

/// A file-backed [`SecretBackend`] for single-node deployments using the
/// local state backend. The file is expected to sit beside, but never
/// inside, the state document.
pub struct FileSecretBackend {
    path: std::path::PathBuf,
}

impl FileSecretBackend {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SecretBackend for FileSecretBackend {
    async fn load(&self) -> Result<SecretsDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SecretsDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, doc: &SecretsDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(doc)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_parameter_is_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileSecretBackend::new(dir.path().join("secrets.json")));
        let store = SecretStore::new(backend, Duration::from_secs(60));
        let creds = store.get(&SyncId("missing".into())).await.unwrap();
        assert!(creds.source_token.is_none());
        assert!(creds.target_token.is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileSecretBackend::new(dir.path().join("secrets.json")));
        let store = SecretStore::new(backend, Duration::from_secs(60));
        let id = SyncId("s1".into());
        store
            .put(
                &id,
                SyncCredentials {
                    source_token: Some("src-token".into()),
                    target_token: Some("tgt-token".into()),
                },
            )
            .await
            .unwrap();
        let creds = store.get(&id).await.unwrap();
        assert_eq!(creds.source_token.as_deref(), Some("src-token"));
        assert_eq!(creds.target_token.as_deref(), Some("tgt-token"));
    }
}
