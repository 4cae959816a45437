// src/core/provider/rest_graphql.rs

//! The concrete, GitHub-shaped [`ProviderClient`]. Organization listing and
//! migration-node/metadata lookups go over GraphQL; existence, timestamp,
//! delete, and validation calls go over REST. Endpoint URLs are derived per
//! sync (see [`crate::core::model::HostEndpoint::derive`]) so the same
//! client serves both public and enterprise hosts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::{ControllerError, Result};
use crate::core::model::{HostEndpoint, RepoMetadata, Visibility};
use crate::core::provider::client::{
    DiscoveredRepo, MigrationNode, ProviderClient, RepoTimestamps, TokenValidation,
};
use crate::core::provider::http::send_with_retry;
use crate::core::rate_limit::RateLimitTracker;

const USER_AGENT: &str = "repo-sync-controller";
const PAGE_SIZE: u32 = 100;

pub struct GitProviderClient {
    http: Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl GitProviderClient {
    pub fn new(http: Client, rate_limit: Arc<RateLimitTracker>) -> Self {
        Self { http, rate_limit }
    }

    async fn graphql(&self, endpoint: &HostEndpoint, token: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let response = send_with_retry(&self.rate_limit, &endpoint.host_label, || {
            self.http
                .post(&endpoint.graphql_url)
                .header("User-Agent", USER_AGENT)
                .bearer_auth(token)
                .json(&body)
        })
        .await?;
        let payload: GraphQlEnvelope = response.json().await?;
        if let Some(errors) = payload.errors
            && !errors.is_empty()
        {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ControllerError::Http(format!("GraphQL error: {message}")));
        }
        payload
            .data
            .ok_or_else(|| ControllerError::Http("GraphQL response carried no data".into()))
    }
}

#[derive(Deserialize)]
struct GraphQlEnvelope {
    data: Option<serde_json::Value>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

const ORG_REPOS_QUERY: &str = r#"
query($org: String!, $cursor: String, $pageSize: Int!) {
  organization(login: $org) {
    repositories(first: $pageSize, after: $cursor, orderBy: {field: NAME, direction: ASC}) {
      pageInfo { hasNextPage endCursor }
      nodes { name visibility isArchived isDisabled isFork }
    }
  }
}
"#;

#[derive(Deserialize)]
struct OrgReposData {
    organization: Option<OrgReposOrg>,
}

#[derive(Deserialize)]
struct OrgReposOrg {
    repositories: OrgReposConnection,
}

#[derive(Deserialize)]
struct OrgReposConnection {
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
    nodes: Vec<RepoNode>,
}

#[derive(Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

#[derive(Deserialize)]
struct RepoNode {
    name: String,
    visibility: String,
    #[serde(rename = "isArchived")]
    is_archived: bool,
    #[serde(rename = "isDisabled")]
    is_disabled: bool,
    #[serde(rename = "isFork")]
    is_fork: bool,
}

fn parse_visibility(raw: &str) -> Visibility {
    match raw.to_ascii_uppercase().as_str() {
        "PRIVATE" => Visibility::Private,
        "INTERNAL" => Visibility::Internal,
        _ => Visibility::Public,
    }
}

const REPO_METADATA_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    description
    isArchived
    diskUsage
    primaryLanguage { name }
    languages(first: 20) { edges { size node { name } } }
    refs(refPrefix: "refs/heads/") { totalCount }
    defaultBranchRef { target { ... on Commit { history { totalCount } } } }
  }
}
"#;

#[derive(Deserialize)]
struct RepoMetadataData {
    repository: Option<RepoMetadataNode>,
}

#[derive(Deserialize)]
struct RepoMetadataNode {
    description: Option<String>,
    #[serde(rename = "isArchived")]
    is_archived: bool,
    #[serde(rename = "diskUsage")]
    disk_usage: Option<u64>,
    #[serde(rename = "primaryLanguage")]
    primary_language: Option<LanguageName>,
    languages: Option<LanguageEdges>,
    refs: Option<TotalCount>,
    #[serde(rename = "defaultBranchRef")]
    default_branch_ref: Option<DefaultBranchRef>,
}

#[derive(Deserialize)]
struct LanguageName {
    name: String,
}

#[derive(Deserialize)]
struct LanguageEdges {
    edges: Vec<LanguageEdge>,
}

#[derive(Deserialize)]
struct LanguageEdge {
    size: u64,
    node: LanguageName,
}

#[derive(Deserialize)]
struct TotalCount {
    #[serde(rename = "totalCount")]
    total_count: u64,
}

#[derive(Deserialize)]
struct DefaultBranchRef {
    target: Option<CommitTarget>,
}

#[derive(Deserialize)]
struct CommitTarget {
    history: Option<TotalCount>,
}

const MIGRATION_NODE_QUERY: &str = r#"
query($id: ID!) {
  node(id: $id) {
    ... on Migration {
      state
      createdAt
      failureReason
      migrationLogUrl
    }
  }
}
"#;

#[derive(Deserialize)]
struct MigrationNodeData {
    node: Option<MigrationNodePayload>,
}

#[derive(Deserialize)]
struct MigrationNodePayload {
    state: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "failureReason")]
    failure_reason: Option<String>,
    #[serde(rename = "migrationLogUrl")]
    migration_log_url: Option<String>,
}

#[async_trait]
impl ProviderClient for GitProviderClient {
    async fn list_org_repos(&self, endpoint: &HostEndpoint, token: &str) -> Result<Vec<DiscoveredRepo>> {
        let mut repos = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body = json!({
                "query": ORG_REPOS_QUERY,
                "variables": { "org": endpoint.org, "cursor": cursor, "pageSize": PAGE_SIZE },
            });
            let data: OrgReposData = serde_json::from_value(self.graphql(endpoint, token, body).await?)?;
            let Some(org) = data.organization else {
                return Err(ControllerError::NotFound(format!(
                    "organization {} not found at {}",
                    endpoint.org, endpoint.host_label
                )));
            };
            for node in org.repositories.nodes {
                repos.push(DiscoveredRepo {
                    name: node.name,
                    visibility: parse_visibility(&node.visibility),
                    is_archived: node.is_archived,
                    is_disabled: node.is_disabled,
                    is_fork: node.is_fork,
                });
            }
            if org.repositories.page_info.has_next_page {
                cursor = org.repositories.page_info.end_cursor;
            } else {
                break;
            }
        }
        Ok(repos)
    }

    async fn repo_timestamps(
        &self,
        endpoint: &HostEndpoint,
        token: &str,
        name: &str,
    ) -> Result<Option<RepoTimestamps>> {
        #[derive(Deserialize)]
        struct Repo {
            #[serde(alias = "pushed_at", alias = "updated_at")]
            pushed_at: Option<DateTime<Utc>>,
        }
        let url = format!("{}/repos/{}/{}", endpoint.rest_base, endpoint.org, name);
        let response = send_with_retry(&self.rate_limit, &endpoint.host_label, || {
            self.http.get(&url).header("User-Agent", USER_AGENT).bearer_auth(token)
        })
        .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let repo: Repo = response.json().await?;
        Ok(Some(RepoTimestamps { pushed_at: repo.pushed_at }))
    }

    async fn fetch_repo_metadata(&self, endpoint: &HostEndpoint, token: &str, name: &str) -> Result<RepoMetadata> {
        let body = json!({
            "query": REPO_METADATA_QUERY,
            "variables": { "owner": endpoint.org, "name": name },
        });
        let data: RepoMetadataData = serde_json::from_value(self.graphql(endpoint, token, body).await?)?;
        let Some(node) = data.repository else {
            return Err(ControllerError::NotFound(format!("repository {name} not found")));
        };
        let mut language_sizes = std::collections::HashMap::new();
        if let Some(languages) = node.languages {
            for edge in languages.edges {
                language_sizes.insert(edge.node.name, edge.size);
            }
        }
        let commit_count = node
            .default_branch_ref
            .and_then(|r| r.target)
            .and_then(|t| t.history)
            .map(|h| h.total_count);
        Ok(RepoMetadata {
            description: node.description,
            primary_language: node.primary_language.map(|l| l.name),
            language_sizes,
            disk_size_kb: node.disk_usage,
            commit_count,
            branch_count: node.refs.map(|r| r.total_count),
            archived_at_source: node.is_archived,
        })
    }

    async fn delete_repo(&self, endpoint: &HostEndpoint, token: &str, name: &str) -> Result<()> {
        let url = format!("{}/repos/{}/{}", endpoint.rest_base, endpoint.org, name);
        let response = send_with_retry(&self.rate_limit, &endpoint.host_label, || {
            self.http.delete(&url).header("User-Agent", USER_AGENT).bearer_auth(token)
        })
        .await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(ControllerError::Http(format!(
                "delete {name} failed with {}",
                response.status()
            )))
        }
    }

    async fn validate_token(&self, endpoint: &HostEndpoint, token: &str) -> Result<TokenValidation> {
        let url = format!("{}/user", endpoint.rest_base);
        let response = send_with_retry(&self.rate_limit, &endpoint.host_label, || {
            self.http.get(&url).header("User-Agent", USER_AGENT).bearer_auth(token)
        })
        .await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let saml_sso_required = response
                .headers()
                .get("x-github-sso")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("required"))
                .unwrap_or(false);
            return Ok(TokenValidation {
                scopes: Vec::new(),
                is_fine_grained: false,
                saml_sso_required,
            });
        }
        let scopes_header = response
            .headers()
            .get("x-oauth-scopes")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_fine_grained = scopes_header.is_none();
        let scopes = scopes_header
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(TokenValidation {
            scopes,
            is_fine_grained,
            saml_sso_required: false,
        })
    }

    async fn org_exists(&self, endpoint: &HostEndpoint, token: &str) -> Result<bool> {
        let url = format!("{}/orgs/{}", endpoint.rest_base, endpoint.org);
        let response = send_with_retry(&self.rate_limit, &endpoint.host_label, || {
            self.http.get(&url).header("User-Agent", USER_AGENT).bearer_auth(token)
        })
        .await?;
        Ok(response.status().is_success())
    }

    async fn fetch_migration_node(
        &self,
        endpoint: &HostEndpoint,
        token: &str,
        migration_id: &str,
    ) -> Result<Option<MigrationNode>> {
        let body = json!({
            "query": MIGRATION_NODE_QUERY,
            "variables": { "id": migration_id },
        });
        let data: MigrationNodeData = serde_json::from_value(self.graphql(endpoint, token, body).await?)?;
        Ok(data.node.map(|n| MigrationNode {
            state: n.state,
            created_at: n.created_at,
            failure_reason: n.failure_reason,
            migration_log_url: n.migration_log_url,
        }))
    }
}
