use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use super::{map_page, CodeHost, PageStream};
use crate::client::{headers, Query, RemoteClient};
use crate::config::{Env, Platform};
use crate::error::RemoteError;
use crate::models::{RawMatch, Scope, ScopeId};
use crate::rate_limit::RateLimiter;

pub const LIST_PAGE_SIZE: u32 = 10;
pub const SEARCH_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    full_name: String,
    html_url: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct TextMatch {
    #[serde(default)]
    fragment: String,
}

#[derive(Debug, Deserialize)]
struct CodeRecord {
    name: String,
    path: String,
    html_url: String,
    #[serde(default)]
    repository: Option<RepositoryRef>,
    #[serde(default)]
    text_matches: Vec<TextMatch>,
}

/// Map a repository record. GitHub scopes are keyed by their `owner/repo` name.
pub fn map_repository(record: Value) -> Result<Scope, serde_json::Error> {
    let repo: RepositoryRecord = serde_json::from_value(record)?;
    Ok(Scope {
        name: repo.full_name.clone(),
        id: ScopeId::Path(repo.full_name),
        url: repo.html_url,
        archived: repo.archived,
    })
}

/// Map a code search item. GitHub reports no line numbers.
pub fn map_code_item(record: Value) -> Result<RawMatch, serde_json::Error> {
    let item: CodeRecord = serde_json::from_value(record)?;
    let preview = item
        .text_matches
        .into_iter()
        .map(|m| m.fragment)
        .find(|f| !f.is_empty())
        .unwrap_or_default();
    Ok(RawMatch {
        file_path: item.path,
        file_name: item.name,
        start_line: None,
        preview,
        ref_name: None,
        web_url: Some(item.html_url),
        scope_id: item.repository.map(|r| ScopeId::Path(r.full_name)),
    })
}

/// GitHub REST v3.
pub struct GitHubHost {
    client: RemoteClient,
    search_limiter: Arc<RateLimiter>,
}

impl GitHubHost {
    pub fn new(env: &Env) -> Result<Self, RemoteError> {
        let default_headers = headers(&[
            ("accept", "application/vnd.github.text-match+json".to_string()),
            ("authorization", format!("Bearer {}", env.private_token)),
            ("x-github-api-version", "2022-11-28".to_string()),
        ]);
        let client = RemoteClient::new(&env.host_name, default_headers, env.verify_ssl)?;
        let (calls, period) = Platform::GitHub.search_rate_limit();

        Ok(Self {
            client,
            search_limiter: Arc::new(RateLimiter::new(calls, period)),
        })
    }
}

#[async_trait]
impl CodeHost for GitHubHost {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    async fn scope_info(&self, scope_id: &ScopeId) -> Result<Scope, RemoteError> {
        let endpoint = match scope_id {
            ScopeId::Numeric(id) => {
                let id = id.to_string();
                self.client.endpoint(&["repositories", id.as_str()])
            }
            ScopeId::Path(full_name) => {
                let mut segments = vec!["repos"];
                segments.extend(full_name.split('/').filter(|s| !s.is_empty()));
                self.client.endpoint(segments.as_slice())
            }
        };
        let page = self
            .client
            .fetch_page(&endpoint, &Query::new(), None)
            .await
            .map_err(|e| e.with_scope(scope_id))?;

        let record = page.items.into_iter().next().ok_or_else(|| {
            RemoteError::unexpected(endpoint.as_str(), "empty repository body").with_scope(scope_id)
        })?;
        map_repository(record)
            .map_err(|e| RemoteError::unexpected(endpoint.as_str(), e).with_scope(scope_id))
    }

    fn list_scopes(&self, owner: Option<&str>) -> PageStream<Scope> {
        let endpoint = match owner {
            Some(owner) => self.client.endpoint(&["users", owner, "repos"]),
            None => self.client.endpoint(&["user", "repos"]),
        };
        let query = vec![
            ("page", "1".to_string()),
            ("per_page", LIST_PAGE_SIZE.to_string()),
        ];

        self.client
            .fetch_all(endpoint, query)
            .map(|page| page.and_then(|page| map_page(page.items, "GitHub repository list", map_repository)))
            .boxed()
    }

    fn search(&self, scope_id: &ScopeId, keyword: &str) -> PageStream<RawMatch> {
        let full_name = match scope_id {
            ScopeId::Path(full_name) => full_name,
            ScopeId::Numeric(_) => {
                let err = RemoteError {
                    scope_id: Some(scope_id.clone()),
                    status: None,
                    message: "GitHub code search needs the repository as owner/repo".to_string(),
                };
                return stream::once(async move { Err(err) }).boxed();
            }
        };
        let endpoint = self.client.endpoint(&["search", "code"]);
        let query = vec![
            ("q", format!("{} repo:{}", keyword, full_name)),
            ("per_page", SEARCH_PAGE_SIZE.to_string()),
        ];
        let scope_id = scope_id.clone();

        self.client
            .fetch_all_throttled(endpoint, query, Some(self.search_limiter.clone()))
            .map(move |page| {
                page.and_then(|page| map_page(page.items, "GitHub search", map_code_item))
                    .map_err(|e| e.with_scope(&scope_id))
            })
            .boxed()
    }
}
