use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LINK, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::models::Page;
use crate::rate_limit::RateLimiter;

pub const APP_NAME: &str = "git_search_command";

/// Deadline of every HTTP call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const MAX_TOO_MANY_REQUESTS_RETRIES: u32 = 3;
const DEFAULT_RETRY_AFTER_SECS: u64 = 10;

/// Query string of a request, as ordered key/value pairs.
pub type Query = Vec<(&'static str, String)>;

/// Thin paginating HTTP client bound to one API host.
#[derive(Clone)]
pub struct RemoteClient {
    http: Client,
    base: Url,
}

impl RemoteClient {
    /// Create a client for `host`, sending `headers` on every request.
    pub fn new(host: &str, headers: HeaderMap, verify_ssl: bool) -> Result<Self, RemoteError> {
        let base = parse_base_url(host)?;
        let http = Client::builder()
            .user_agent(APP_NAME)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| RemoteError::transport(host, &e))?;

        Ok(Self { http, base })
    }

    /// Resolve `segments` against the host, percent-encoding each of them.
    pub fn endpoint<S: AsRef<str>>(&self, segments: &[S]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.push(segment.as_ref());
            }
        }
        url
    }

    /// Fetch one page. With a `page_token` the token URL is requested as-is.
    pub async fn fetch_page(
        &self,
        endpoint: &Url,
        query: &Query,
        page_token: Option<&str>,
    ) -> Result<Page, RemoteError> {
        let url = match page_token {
            Some(token) => Url::parse(token)
                .map_err(|e| RemoteError::unexpected("pagination link", e))?,
            None => {
                let mut url = endpoint.clone();
                if !query.is_empty() {
                    url.query_pairs_mut()
                        .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
                }
                url
            }
        };

        let response = self.send(&url).await?;
        let status = response.status();

        // Past the first page a 422 means the search window is exhausted.
        if status == StatusCode::UNPROCESSABLE_ENTITY && page_token.is_some() {
            warn!("Reached search limit at {}", url);
            return Ok(Page::default());
        }

        wait_for_rate_limit_reset(response.headers()).await;

        if !status.is_success() {
            return Err(RemoteError::status(url.as_str(), status));
        }

        let next_page_token = next_link(response.headers());
        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::unexpected(url.as_str(), e))?;

        Ok(Page {
            items: page_items(body),
            next_page_token,
        })
    }

    /// Lazily walk every page of `endpoint`, following `Link: rel="next"`.
    pub fn fetch_all(&self, endpoint: Url, query: Query) -> BoxStream<'static, Result<Page, RemoteError>> {
        self.fetch_all_throttled(endpoint, query, None)
    }

    /// Like [`fetch_all`](Self::fetch_all), taking a `limiter` slot before each page.
    pub fn fetch_all_throttled(
        &self,
        endpoint: Url,
        query: Query,
        limiter: Option<Arc<RateLimiter>>,
    ) -> BoxStream<'static, Result<Page, RemoteError>> {
        let client = self.clone();
        stream::try_unfold(Cursor::First, move |cursor| {
            let client = client.clone();
            let endpoint = endpoint.clone();
            let query = query.clone();
            let limiter = limiter.clone();
            async move {
                let token = match cursor {
                    Cursor::Done => return Ok::<_, RemoteError>(None),
                    Cursor::First => None,
                    Cursor::Next(url) => Some(url),
                };
                if let Some(limiter) = &limiter {
                    limiter.acquire().await;
                }
                let page = client.fetch_page(&endpoint, &query, token.as_deref()).await?;
                let next = match &page.next_page_token {
                    Some(url) => Cursor::Next(url.clone()),
                    None => Cursor::Done,
                };
                Ok::<_, RemoteError>(Some((page, next)))
            }
        })
        .boxed()
    }

    async fn send(&self, url: &Url) -> Result<reqwest::Response, RemoteError> {
        let mut attempt = 0;
        loop {
            debug!("Request  --> GET {}", url);
            let started = Instant::now();
            let response = self
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| RemoteError::transport(url.as_str(), &e))?;
            debug!("Response <-- [{:?}] {}", started.elapsed(), response.status());

            if response.status() != StatusCode::TOO_MANY_REQUESTS
                || attempt >= MAX_TOO_MANY_REQUESTS_RETRIES
            {
                return Ok(response);
            }

            attempt += 1;
            let wait = retry_after(response.headers());
            warn!(
                "Too many requests for {}. Retry {}/{} in {:?}",
                url, attempt, MAX_TOO_MANY_REQUESTS_RETRIES, wait
            );
            sleep(wait).await;
        }
    }
}

enum Cursor {
    First,
    Next(String),
    Done,
}

fn parse_base_url(host: &str) -> Result<Url, RemoteError> {
    let trimmed = host.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    Url::parse(&with_scheme).map_err(|e| RemoteError::unexpected("host name", e))
}

/// Split a response body into records.
fn page_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                map.insert("items".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Extract the `rel="next"` target of a `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

fn retry_after(headers: &HeaderMap) -> Duration {
    let secs = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs)
}

fn header_u64(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    })
}

/// Seconds to wait when the platform reports an exhausted quota.
fn rate_limit_wait(headers: &HeaderMap, now: i64) -> Option<u64> {
    let remaining = header_u64(headers, &["x-ratelimit-remaining", "ratelimit-remaining"])?;
    if remaining != 0 {
        return None;
    }
    let reset = header_u64(headers, &["x-ratelimit-reset", "ratelimit-reset"])?;
    let now = u64::try_from(now).ok()?;
    (reset > now).then(|| reset - now + 1)
}

async fn wait_for_rate_limit_reset(headers: &HeaderMap) {
    if let Some(wait_secs) = rate_limit_wait(headers, Utc::now().timestamp()) {
        warn!("Rate limit reached. Waiting {} seconds...", wait_secs);
        sleep(Duration::from_secs(wait_secs)).await;
    }
}

/// Build a header map from static pairs, skipping values that are not valid headers.
pub fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        match HeaderValue::from_str(value) {
            Ok(mut value) => {
                if name.eq_ignore_ascii_case("private-token")
                    || name.eq_ignore_ascii_case("authorization")
                {
                    value.set_sensitive(true);
                }
                map.insert(HeaderName::from_static(*name), value);
            }
            Err(_) => warn!("Skipping invalid value for header {}", name),
        }
    }
    map
}
