//! Turns a search request into a stream of [`SearchEvent`]s.
//!
//! Single-scope runs pair the scope info with its consolidated matches and emit
//! one result. Multi-scope runs page through the scope list, fan each active
//! scope out to its own task, and forward results in completion order. A
//! per-scope failure in a multi-scope run is logged and dropped; everything
//! else that fails ends the stream with [`SearchEvent::Failed`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{SearchTarget, SessionContext};
use crate::consolidate::consolidate;
use crate::error::RemoteError;
use crate::host::CodeHost;
use crate::models::{RawMatch, Scope, ScopeId, ScopeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    SingleScope,
    MultiScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSummary {
    /// Scopes that produced a `Matched` event.
    pub scopes_searched: usize,
    pub mode: SearchMode,
}

/// One message of a search run. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Matched(ScopeResult),
    Complete(SearchSummary),
    Failed(RemoteError),
}

impl SearchEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchEvent::Matched(_))
    }
}

#[derive(Debug, Clone, Copy)]
enum SearchState {
    Idle,
    FetchingScopes,
    Searching,
    Completed,
    Failed,
}

fn transition(from: SearchState, to: SearchState) -> SearchState {
    debug!("Search state {:?} -> {:?}", from, to);
    to
}

/// Receiving end of a search run.
#[derive(Debug)]
pub struct SearchStream {
    rx: UnboundedReceiver<SearchEvent>,
}

impl SearchStream {
    fn channel() -> (UnboundedSender<SearchEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl Stream for SearchStream {
    type Item = SearchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Drives searches against one [`CodeHost`].
#[derive(Clone)]
pub struct SearchOrchestrator {
    host: Arc<dyn CodeHost>,
    workers: usize,
}

impl SearchOrchestrator {
    /// `workers` bounds how many scopes are searched at once.
    pub fn new(host: Arc<dyn CodeHost>, workers: usize) -> Self {
        Self {
            host,
            workers: workers.max(1),
        }
    }

    /// Start the workflow matching the session's target.
    ///
    /// Must be called from within a tokio runtime.
    pub fn search(&self, ctx: &SessionContext) -> SearchStream {
        info!(
            "Searching {} for \"{}\" in {:?}",
            self.host.platform().name(),
            ctx.keyword,
            ctx.target
        );
        match &ctx.target {
            SearchTarget::Scope(scope_id) => self.search_in_scope(scope_id.clone(), &ctx.keyword),
            SearchTarget::Group(group) => self.search_in_group(group.clone(), &ctx.keyword),
        }
    }

    /// Search one scope: a single `Matched`, then `Complete`, or only `Failed`.
    pub fn search_in_scope(&self, scope_id: ScopeId, keyword: &str) -> SearchStream {
        let (tx, stream) = SearchStream::channel();
        let host = self.host.clone();
        let keyword = keyword.to_string();

        tokio::spawn(async move {
            let state = transition(SearchState::Idle, SearchState::Searching);
            match search_scope(host.as_ref(), &scope_id, &keyword).await {
                Ok(result) => {
                    let _ = tx.send(SearchEvent::Matched(result));
                    let _ = tx.send(SearchEvent::Complete(SearchSummary {
                        scopes_searched: 1,
                        mode: SearchMode::SingleScope,
                    }));
                    transition(state, SearchState::Completed);
                }
                Err(e) => {
                    error!("Search in {} failed: {}", scope_id, e);
                    let _ = tx.send(SearchEvent::Failed(e));
                    transition(state, SearchState::Failed);
                }
            }
        });

        stream
    }

    /// Search every active scope of `group`, or the caller's own scopes.
    pub fn search_in_group(&self, group: Option<String>, keyword: &str) -> SearchStream {
        let (tx, stream) = SearchStream::channel();
        let host = self.host.clone();
        let keyword: Arc<str> = Arc::from(keyword);
        let semaphore = Arc::new(Semaphore::new(self.workers));

        tokio::spawn(async move {
            let mut state = transition(SearchState::Idle, SearchState::FetchingScopes);
            let mut pages = host.list_scopes(group.as_deref());
            let mut tasks: JoinSet<(ScopeId, Result<ScopeResult, RemoteError>)> = JoinSet::new();
            let mut listing = true;
            let mut dispatched = 0usize;
            let mut scopes_searched = 0usize;

            loop {
                tokio::select! {
                    page = pages.next(), if listing => match page {
                        Some(Ok(scopes)) => {
                            for scope in scopes {
                                if scope.archived {
                                    debug!("Skipping archived scope {} ({})", scope.id, scope.name);
                                    continue;
                                }
                                if dispatched == 0 {
                                    state = transition(state, SearchState::Searching);
                                }
                                dispatched += 1;

                                let host = host.clone();
                                let keyword = keyword.clone();
                                let semaphore = semaphore.clone();
                                tasks.spawn(async move {
                                    let id = scope.id.clone();
                                    let _permit = semaphore.acquire_owned().await;
                                    (id, search_listed_scope(host.as_ref(), scope, &keyword).await)
                                });
                            }
                        }
                        Some(Err(e)) => {
                            error!("Listing scopes failed: {}", e);
                            tasks.abort_all();
                            let _ = tx.send(SearchEvent::Failed(e));
                            transition(state, SearchState::Failed);
                            return;
                        }
                        None => listing = false,
                    },
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                        Ok((_, Ok(result))) => {
                            scopes_searched += 1;
                            let _ = tx.send(SearchEvent::Matched(result));
                        }
                        Ok((scope_id, Err(e))) => {
                            warn!("Search in scope {} failed, skipping it: {}", scope_id, e);
                        }
                        Err(e) => warn!("Scope search task did not finish: {}", e),
                    },
                    else => break,
                }
            }

            info!("Searched {} of {} dispatched scope(s)", scopes_searched, dispatched);
            let _ = tx.send(SearchEvent::Complete(SearchSummary {
                scopes_searched,
                mode: SearchMode::MultiScope,
            }));
            transition(state, SearchState::Completed);
        });

        stream
    }
}

async fn search_scope(
    host: &dyn CodeHost,
    scope_id: &ScopeId,
    keyword: &str,
) -> Result<ScopeResult, RemoteError> {
    let (scope, matches) = tokio::try_join!(
        host.scope_info(scope_id),
        host.search(scope_id, keyword).try_concat(),
    )?;
    Ok(ScopeResult {
        scope,
        files: consolidate(matches),
    })
}

async fn search_listed_scope(
    host: &dyn CodeHost,
    scope: Scope,
    keyword: &str,
) -> Result<ScopeResult, RemoteError> {
    let matches: Vec<RawMatch> = host.search(&scope.id, keyword).try_concat().await?;
    debug!("{} raw match(es) in {}", matches.len(), scope.id);
    Ok(ScopeResult {
        scope,
        files: consolidate(matches),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream;

    use crate::config::Platform;
    use crate::host::PageStream;

    fn scope(id: u64, archived: bool) -> Scope {
        Scope {
            id: ScopeId::Numeric(id),
            name: format!("team / project-{}", id),
            url: format!("https://gitlab.example.com/team/project-{}", id),
            archived,
        }
    }

    fn hit(path: &str, line: u32) -> RawMatch {
        RawMatch {
            file_path: path.to_string(),
            file_name: path.to_string(),
            start_line: Some(line),
            preview: format!("line {}", line),
            ref_name: Some("main".into()),
            web_url: None,
            scope_id: None,
        }
    }

    fn failure(message: &str) -> RemoteError {
        RemoteError {
            scope_id: None,
            status: Some(500),
            message: message.to_string(),
        }
    }

    #[derive(Default)]
    struct FakeHost {
        scope_pages: Vec<Vec<Scope>>,
        list_error: Option<RemoteError>,
        info_error: Option<RemoteError>,
        hits: HashMap<ScopeId, Result<Vec<Vec<RawMatch>>, RemoteError>>,
        searched: Mutex<Vec<ScopeId>>,
    }

    #[async_trait]
    impl CodeHost for FakeHost {
        fn platform(&self) -> Platform {
            Platform::GitLab
        }

        async fn scope_info(&self, scope_id: &ScopeId) -> Result<Scope, RemoteError> {
            if let Some(e) = &self.info_error {
                return Err(e.clone());
            }
            match scope_id {
                ScopeId::Numeric(id) => Ok(scope(*id, false)),
                ScopeId::Path(_) => Err(failure("unknown scope")),
            }
        }

        fn list_scopes(&self, _group: Option<&str>) -> PageStream<Scope> {
            let mut pages: Vec<Result<Vec<Scope>, RemoteError>> =
                self.scope_pages.iter().cloned().map(Ok).collect();
            if let Some(e) = &self.list_error {
                pages.push(Err(e.clone()));
            }
            stream::iter(pages).boxed()
        }

        fn search(&self, scope_id: &ScopeId, _keyword: &str) -> PageStream<RawMatch> {
            self.searched.lock().unwrap().push(scope_id.clone());
            let pages: Vec<Result<Vec<RawMatch>, RemoteError>> = match self.hits.get(scope_id) {
                Some(Ok(pages)) => pages.iter().cloned().map(Ok).collect(),
                Some(Err(e)) => vec![Err(e.clone())],
                None => Vec::new(),
            };
            stream::iter(pages).boxed()
        }
    }

    fn orchestrator(host: FakeHost) -> (SearchOrchestrator, Arc<FakeHost>) {
        let host = Arc::new(host);
        (SearchOrchestrator::new(host.clone(), 4), host)
    }

    #[tokio::test]
    async fn test_single_scope_emits_result_then_complete() {
        let mut host = FakeHost::default();
        host.hits.insert(
            ScopeId::Numeric(7),
            Ok(vec![vec![hit("a.rs", 1), hit("a.rs", 2)], vec![hit("b.rs", 5)]]),
        );
        let (orchestrator, _) = orchestrator(host);

        let events: Vec<SearchEvent> = orchestrator
            .search_in_scope(ScopeId::Numeric(7), "needle")
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        match &events[0] {
            SearchEvent::Matched(result) => {
                assert_eq!(result.scope.id, ScopeId::Numeric(7));
                let paths: Vec<&str> = result.files.iter().map(|f| f.file_path.as_str()).collect();
                assert_eq!(paths, vec!["a.rs", "b.rs"]);
                assert_eq!(result.files[0].start_lines, vec![1, 2]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events[1],
            SearchEvent::Complete(SearchSummary {
                scopes_searched: 1,
                mode: SearchMode::SingleScope
            })
        ));
    }

    #[tokio::test]
    async fn test_single_scope_failure_emits_only_failed() {
        let mut host = FakeHost::default();
        host.info_error = Some(failure("404 Not Found"));
        host.hits
            .insert(ScopeId::Numeric(7), Ok(vec![vec![hit("a.rs", 1)]]));
        let (orchestrator, _) = orchestrator(host);

        let events: Vec<SearchEvent> = orchestrator
            .search_in_scope(ScopeId::Numeric(7), "needle")
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SearchEvent::Failed(e) if e.message == "404 Not Found"));
    }

    #[tokio::test]
    async fn test_single_scope_search_failure_emits_only_failed() {
        let mut host = FakeHost::default();
        host.hits
            .insert(ScopeId::Numeric(7), Err(failure("500 Internal Server Error")));
        let (orchestrator, _) = orchestrator(host);

        let events: Vec<SearchEvent> = orchestrator
            .search_in_scope(ScopeId::Numeric(7), "needle")
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert!(matches!(events[0], SearchEvent::Failed(_)));
    }

    #[tokio::test]
    async fn test_group_skips_archived_and_swallows_scope_failures() {
        let mut host = FakeHost::default();
        host.scope_pages = vec![
            vec![scope(1, false), scope(2, false)],
            vec![scope(3, false), scope(4, true)],
        ];
        host.hits
            .insert(ScopeId::Numeric(1), Ok(vec![vec![hit("a.rs", 3)]]));
        host.hits
            .insert(ScopeId::Numeric(2), Err(failure("502 Bad Gateway")));
        let (orchestrator, host) = orchestrator(host);

        let events: Vec<SearchEvent> = orchestrator
            .search_in_group(Some("team".into()), "needle")
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        let mut matched: Vec<(ScopeId, usize)> = events[..2]
            .iter()
            .map(|event| match event {
                SearchEvent::Matched(result) => (result.scope.id.clone(), result.files.len()),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        matched.sort_by_key(|(id, _)| id.to_string());
        assert_eq!(
            matched,
            vec![(ScopeId::Numeric(1), 1), (ScopeId::Numeric(3), 0)]
        );
        assert!(matches!(
            events[2],
            SearchEvent::Complete(SearchSummary {
                scopes_searched: 2,
                mode: SearchMode::MultiScope
            })
        ));

        let searched = host.searched.lock().unwrap();
        assert_eq!(searched.len(), 3);
        assert!(!searched.contains(&ScopeId::Numeric(4)));
    }

    #[tokio::test]
    async fn test_group_list_failure_emits_failed() {
        let mut host = FakeHost::default();
        host.scope_pages = vec![vec![scope(1, false)]];
        host.list_error = Some(failure("401 Unauthorized"));
        let (orchestrator, _) = orchestrator(host);

        let events: Vec<SearchEvent> = orchestrator.search_in_group(None, "needle").collect().await;

        assert!(matches!(events.last(), Some(SearchEvent::Failed(e)) if e.message == "401 Unauthorized"));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    /// Searches take a per-scope delay and record how many run at once.
    struct SlowHost {
        scopes: Vec<Scope>,
        delays: HashMap<ScopeId, Duration>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl SlowHost {
        fn new(delays_ms: &[(u64, u64)]) -> Self {
            Self {
                scopes: delays_ms.iter().map(|(id, _)| scope(*id, false)).collect(),
                delays: delays_ms
                    .iter()
                    .map(|(id, ms)| (ScopeId::Numeric(*id), Duration::from_millis(*ms)))
                    .collect(),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl CodeHost for SlowHost {
        fn platform(&self) -> Platform {
            Platform::GitLab
        }

        async fn scope_info(&self, scope_id: &ScopeId) -> Result<Scope, RemoteError> {
            Err(failure(&format!("unexpected lookup of {}", scope_id)))
        }

        fn list_scopes(&self, _group: Option<&str>) -> PageStream<Scope> {
            stream::iter(vec![Ok(self.scopes.clone())]).boxed()
        }

        fn search(&self, scope_id: &ScopeId, _keyword: &str) -> PageStream<RawMatch> {
            let delay = self.delays.get(scope_id).copied().unwrap_or_default();
            let active = self.active.clone();
            let peak = self.peak.clone();
            stream::once(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![hit("a.rs", 1)])
            })
            .boxed()
        }
    }

    fn matched_ids(events: &[SearchEvent]) -> Vec<ScopeId> {
        events
            .iter()
            .filter_map(|event| match event {
                SearchEvent::Matched(result) => Some(result.scope.id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_results_arrive_in_completion_order() {
        let host = Arc::new(SlowHost::new(&[(1, 400), (2, 300), (3, 200), (4, 100)]));
        let events: Vec<SearchEvent> = SearchOrchestrator::new(host, 4)
            .search_in_group(Some("team".into()), "needle")
            .collect()
            .await;

        assert_eq!(
            matched_ids(&events),
            vec![
                ScopeId::Numeric(4),
                ScopeId::Numeric(3),
                ScopeId::Numeric(2),
                ScopeId::Numeric(1)
            ]
        );
        assert!(matches!(events.last(), Some(SearchEvent::Complete(s)) if s.scopes_searched == 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_search_runs_at_most_workers_scopes_at_once() {
        let host = Arc::new(SlowHost::new(&[
            (1, 100),
            (2, 100),
            (3, 100),
            (4, 100),
            (5, 100),
            (6, 100),
        ]));
        let events: Vec<SearchEvent> = SearchOrchestrator::new(host.clone(), 2)
            .search_in_group(None, "needle")
            .collect()
            .await;

        assert_eq!(matched_ids(&events).len(), 6);
        assert_eq!(host.peak.load(Ordering::SeqCst), 2);
        assert_eq!(host.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_group_completes() {
        let (orchestrator, _) = orchestrator(FakeHost::default());
        let events: Vec<SearchEvent> = orchestrator.search_in_group(None, "needle").collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SearchEvent::Complete(SearchSummary {
                scopes_searched: 0,
                mode: SearchMode::MultiScope
            })
        ));
    }
}
