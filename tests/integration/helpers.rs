// tests/integration/helpers.rs

//! Shared scaffolding for the integration tests: a tempdir-backed
//! `StateStore` and a `ProviderClient` fake whose migration-node answer can
//! be swapped in from the test body.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use repo_sync_controller::core::errors::Result;
use repo_sync_controller::core::model::{HostEndpoint, RepoMetadata, SyncConfig, SyncId, Visibility};
use repo_sync_controller::core::provider::{DiscoveredRepo, MigrationNode, ProviderClient, RepoTimestamps, TokenValidation};
use repo_sync_controller::core::secrets::{FileSecretBackend, SecretStore};
use repo_sync_controller::core::state::local::LocalBackend;
use repo_sync_controller::core::state::StateStore;

pub async fn test_store(dir: &tempfile::TempDir) -> Arc<StateStore> {
    let backend = LocalBackend::open(dir.path().join("state.json"), dir.path().join("backups"), 24)
        .await
        .expect("open local backend");
    let secrets = Arc::new(SecretStore::new(
        Arc::new(FileSecretBackend::new(dir.path().join("secrets.json"))),
        std::time::Duration::from_secs(60),
    ));
    Arc::new(StateStore::local(backend, secrets))
}

pub fn sample_sync(name: &str) -> SyncConfig {
    let now = Utc::now();
    let endpoint = HostEndpoint::derive(None, "acme", false);
    SyncConfig {
        id: SyncId::new(),
        name: name.into(),
        source: endpoint.clone(),
        target: endpoint,
        created_at: now,
        updated_at: now,
        last_synced_at: None,
        enabled: true,
        archived: false,
    }
}

pub fn sample_visibility() -> Visibility {
    Visibility::Public
}

/// A provider fake whose migration-node answer is set from the test body
/// after a migration id is known, so Discovery/Migration/Progress can be
/// driven through the same fake end to end.
#[derive(Default)]
pub struct FakeProvider {
    pub repos: StdMutex<Vec<DiscoveredRepo>>,
    pub node: StdMutex<Option<MigrationNode>>,
}

impl FakeProvider {
    pub fn set_node(&self, node: Option<MigrationNode>) {
        *self.node.lock().unwrap() = node;
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn list_org_repos(&self, _endpoint: &HostEndpoint, _token: &str) -> Result<Vec<DiscoveredRepo>> {
        Ok(self.repos.lock().unwrap().clone())
    }

    async fn repo_timestamps(&self, _endpoint: &HostEndpoint, _token: &str, _name: &str) -> Result<Option<RepoTimestamps>> {
        Ok(None)
    }

    async fn fetch_repo_metadata(&self, _endpoint: &HostEndpoint, _token: &str, _name: &str) -> Result<RepoMetadata> {
        Ok(RepoMetadata::default())
    }

    async fn delete_repo(&self, _endpoint: &HostEndpoint, _token: &str, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn validate_token(&self, _endpoint: &HostEndpoint, _token: &str) -> Result<TokenValidation> {
        Ok(TokenValidation {
            scopes: vec![],
            is_fine_grained: false,
            saml_sso_required: false,
        })
    }

    async fn org_exists(&self, _endpoint: &HostEndpoint, _token: &str) -> Result<bool> {
        Ok(true)
    }

    async fn fetch_migration_node(&self, _endpoint: &HostEndpoint, _token: &str, _migration_id: &str) -> Result<Option<MigrationNode>> {
        Ok(self.node.lock().unwrap().clone())
    }
}
