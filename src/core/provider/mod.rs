// src/core/provider/mod.rs

//! Typed wrappers over the upstream provider's REST+GraphQL API and the
//! external migration CLI subprocess.

pub mod cli;
pub mod client;
pub mod http;
pub mod rest_graphql;

pub use client::{
    DiscoveredRepo, MigrationNode, ProviderClient, RepoTimestamps, TokenValidation,
};
pub use rest_graphql::GitProviderClient;
