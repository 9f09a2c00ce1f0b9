use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
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
struct ProjectRecord {
    id: u64,
    name_with_namespace: String,
    web_url: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct BlobRecord {
    path: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    basename: Option<String>,
    #[serde(rename = "ref", default)]
    ref_name: Option<String>,
    #[serde(default)]
    startline: Option<u32>,
    #[serde(default)]
    project_id: Option<u64>,
    #[serde(default)]
    data: String,
}

/// Map a `/projects` record.
pub fn map_project(record: Value) -> Result<Scope, serde_json::Error> {
    let project: ProjectRecord = serde_json::from_value(record)?;
    Ok(Scope {
        id: ScopeId::Numeric(project.id),
        name: project.name_with_namespace,
        url: project.web_url,
        archived: project.archived,
    })
}

/// Map a `scope=blobs` search record.
pub fn map_blob(record: Value) -> Result<RawMatch, serde_json::Error> {
    let blob: BlobRecord = serde_json::from_value(record)?;
    let file_name = blob
        .filename
        .or(blob.basename)
        .unwrap_or_else(|| blob.path.rsplit('/').next().unwrap_or_default().to_string());
    Ok(RawMatch {
        file_name,
        start_line: blob.startline,
        preview: blob.data,
        ref_name: blob.ref_name,
        web_url: None,
        scope_id: blob.project_id.map(ScopeId::Numeric),
        file_path: blob.path,
    })
}

/// GitLab REST v4.
pub struct GitLabHost {
    client: RemoteClient,
    search_limiter: Arc<RateLimiter>,
}

impl GitLabHost {
    pub fn new(env: &Env) -> Result<Self, RemoteError> {
        let default_headers = headers(&[
            ("private-token", env.private_token.clone()),
            ("content-type", "application/json;charset=UTF-8".to_string()),
        ]);
        let client = RemoteClient::new(&env.host_name, default_headers, env.verify_ssl)?;
        let (calls, period) = Platform::GitLab.search_rate_limit();

        Ok(Self {
            client,
            search_limiter: Arc::new(RateLimiter::new(calls, period)),
        })
    }
}

#[async_trait]
impl CodeHost for GitLabHost {
    fn platform(&self) -> Platform {
        Platform::GitLab
    }

    async fn scope_info(&self, scope_id: &ScopeId) -> Result<Scope, RemoteError> {
        let id = scope_id.to_string();
        let endpoint = self.client.endpoint(&["api", "v4", "projects", id.as_str()]);
        let page = self
            .client
            .fetch_page(&endpoint, &Query::new(), None)
            .await
            .map_err(|e| e.with_scope(scope_id))?;

        let record = page.items.into_iter().next().ok_or_else(|| {
            RemoteError::unexpected(endpoint.as_str(), "empty project body").with_scope(scope_id)
        })?;
        map_project(record)
            .map_err(|e| RemoteError::unexpected(endpoint.as_str(), e).with_scope(scope_id))
    }

    fn list_scopes(&self, group: Option<&str>) -> PageStream<Scope> {
        let (endpoint, query): (_, Query) = match group {
            Some(group) => (
                self.client
                    .endpoint(&["api", "v4", "groups", group, "projects"]),
                vec![
                    ("per_page", LIST_PAGE_SIZE.to_string()),
                    ("order_by", "id".to_string()),
                    ("sort", "asc".to_string()),
                    ("include_subgroups", "true".to_string()),
                ],
            ),
            None => (
                self.client.endpoint(&["api", "v4", "projects"]),
                vec![
                    ("simple", "true".to_string()),
                    ("owned", "true".to_string()),
                    ("per_page", LIST_PAGE_SIZE.to_string()),
                ],
            ),
        };

        self.client
            .fetch_all(endpoint, query)
            .map(|page| page.and_then(|page| map_page(page.items, "GitLab project list", map_project)))
            .boxed()
    }

    fn search(&self, scope_id: &ScopeId, keyword: &str) -> PageStream<RawMatch> {
        let id = scope_id.to_string();
        let endpoint = self
            .client
            .endpoint(&["api", "v4", "projects", id.as_str(), "search"]);
        let query = vec![
            ("scope", "blobs".to_string()),
            ("search", keyword.to_string()),
            ("per_page", SEARCH_PAGE_SIZE.to_string()),
        ];
        let scope_id = scope_id.clone();

        self.client
            .fetch_all_throttled(endpoint, query, Some(self.search_limiter.clone()))
            .map(move |page| {
                page.and_then(|page| map_page(page.items, "GitLab search", map_blob))
                    .map_err(|e| e.with_scope(&scope_id))
            })
            .boxed()
    }
}
