//! OAuth2 federation with upstream identity providers.

pub mod client;
pub mod provider;

pub use client::{FederationClient, FederationError, OAuthFederation};
pub use provider::{Provider, ProviderEndpoints, UnknownProvider};
