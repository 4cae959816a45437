// src/core/provider/client.rs

//! The `ProviderClient` trait: the only interface the Discovery, Status,
//! Migration and Progress workers use to talk to an upstream provider.
//! Concrete implementations live in `rest_graphql.rs`; the core never
//! depends on a specific provider's quirks beyond this contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::errors::Result;
use crate::core::model::{HostEndpoint, RepoMetadata, Visibility};

/// One row of a source-organization listing, as discovered by the
/// Discovery Worker's GraphQL page walk.
#[derive(Clone, Debug)]
pub struct DiscoveredRepo {
    pub name: String,
    pub visibility: Visibility,
    pub is_archived: bool,
    pub is_disabled: bool,
    pub is_fork: bool,
}

/// The subset of a repository's timestamps the Status Worker compares.
#[derive(Clone, Debug)]
pub struct RepoTimestamps {
    pub pushed_at: Option<DateTime<Utc>>,
}

/// The result of validating a token against `GET /user`.
#[derive(Clone, Debug)]
pub struct TokenValidation {
    pub scopes: Vec<String>,
    /// A fine-grained PAT never returns `X-OAuth-Scopes`; its absence on an
    /// otherwise-successful response is the signal, not an error.
    pub is_fine_grained: bool,
    pub saml_sso_required: bool,
}

/// The provider-side state of an in-flight migration job.
#[derive(Clone, Debug)]
pub struct MigrationNode {
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    pub migration_log_url: Option<String>,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Pages through `endpoint.org`'s repositories via cursor-based GraphQL,
    /// 100 per page, ordered by name ascending.
    async fn list_org_repos(
        &self,
        endpoint: &HostEndpoint,
        token: &str,
    ) -> Result<Vec<DiscoveredRepo>>;

    /// Fetches a single repo's existence and push/update timestamp. `None`
    /// means the repo does not exist at this endpoint.
    async fn repo_timestamps(
        &self,
        endpoint: &HostEndpoint,
        token: &str,
        name: &str,
    ) -> Result<Option<RepoTimestamps>>;

    /// Fetches source metadata (languages, size, commits, branches).
    async fn fetch_repo_metadata(
        &self,
        endpoint: &HostEndpoint,
        token: &str,
        name: &str,
    ) -> Result<RepoMetadata>;

    /// `DELETE /repos/{org}/{name}` on the target.
    async fn delete_repo(&self, endpoint: &HostEndpoint, token: &str, name: &str) -> Result<()>;

    /// `GET /user` + scope inspection, used at sync-validation time.
    async fn validate_token(&self, endpoint: &HostEndpoint, token: &str) -> Result<TokenValidation>;

    /// `GET /orgs/<org>` existence check, used at sync-validation time.
    async fn org_exists(&self, endpoint: &HostEndpoint, token: &str) -> Result<bool>;

    /// Fetches the provider-side migration node by opaque id.
    async fn fetch_migration_node(
        &self,
        endpoint: &HostEndpoint,
        token: &str,
        migration_id: &str,
    ) -> Result<Option<MigrationNode>>;
}
