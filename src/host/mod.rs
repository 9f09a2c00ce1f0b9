//! Per-platform access to scope lists, scope info and code search.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::{Env, Platform};
use crate::error::RemoteError;
use crate::models::{RawMatch, Scope, ScopeId};

pub mod github;
pub mod gitlab;

pub use github::GitHubHost;
pub use gitlab::GitLabHost;

/// A stream of mapped records, one `Vec` per fetched page.
pub type PageStream<T> = BoxStream<'static, Result<Vec<T>, RemoteError>>;

/// The remote operations the search pipeline is built from.
#[async_trait]
pub trait CodeHost: Send + Sync {
    fn platform(&self) -> Platform;

    /// Look up a single project or repository.
    async fn scope_info(&self, scope_id: &ScopeId) -> Result<Scope, RemoteError>;

    /// Page through the scopes of `group`, or the caller's own scopes without one.
    fn list_scopes(&self, group: Option<&str>) -> PageStream<Scope>;

    /// Page through the hits for `keyword` inside one scope.
    fn search(&self, scope_id: &ScopeId, keyword: &str) -> PageStream<RawMatch>;
}

/// Build the host matching the platform of `env`.
pub fn connect(env: &Env) -> Result<Arc<dyn CodeHost>, RemoteError> {
    let host: Arc<dyn CodeHost> = match env.platform {
        Platform::GitLab => Arc::new(GitLabHost::new(env)?),
        Platform::GitHub => Arc::new(GitHubHost::new(env)?),
    };
    Ok(host)
}

/// Decode every record of a page with `map`.
pub(crate) fn map_page<T, F>(
    items: Vec<serde_json::Value>,
    context: &str,
    map: F,
) -> Result<Vec<T>, RemoteError>
where
    F: Fn(serde_json::Value) -> Result<T, serde_json::Error>,
{
    items
        .into_iter()
        .map(|item| map(item).map_err(|e| RemoteError::unexpected(context, e)))
        .collect()
}
