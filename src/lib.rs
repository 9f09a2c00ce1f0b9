//! # git-search-command
//!
//! A library for searching code across GitLab projects and GitHub repositories
//! through their search APIs, with concurrent per-project searches, rate-limit
//! handling, colored console output and markdown export.
//!
//! ## Main Components
//!
//! - [`SearchOrchestrator`]: turns a search request into a stream of [`SearchEvent`]s
//! - [`ResultSink`]: renders that stream and releases the run's [`Gate`] once
//! - [`CodeHost`]: per-platform scope listing and code search over a paginating [`RemoteClient`]
//! - [`EnvStore`]: the persisted environments a search runs against
//! - [`Cli`]: command line argument structure
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use gsc_lib::{connect, EnvStore, Gate, ResultSink, SearchOrchestrator, SinkOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let store = EnvStore::open(EnvStore::default_path()?)?;
//!     let env = store.resolve(None)?;
//!
//!     let orchestrator = SearchOrchestrator::new(connect(&env)?, 4);
//!     let stream = orchestrator.search_in_group(Some("my-group".to_string()), "addImplement");
//!
//!     let options = SinkOptions {
//!         platform: env.platform,
//!         env_name: env.name.clone(),
//!         keyword: "addImplement".to_string(),
//!         multi_scope: true,
//!         ignore_no_result: true,
//!     };
//!     let outcome = ResultSink::new(options, Arc::new(Gate::new())).consume(stream).await;
//!     println!("exit code {}", outcome.exit_code());
//!
//!     Ok(())
//! }
//! ```

mod args;
pub mod cli;
mod client;
mod config;
mod consolidate;
mod error;
mod gate;
pub mod host;
mod models;
mod orchestrator;
mod rate_limit;
mod sink;

// Re-export main components for documentation and external use
pub use crate::args::{Cli, Command, EnvArgs, SearchArgs};
pub use crate::client::{next_link, RemoteClient};
pub use crate::config::{Env, EnvStore, Platform, SearchTarget, SessionContext};
pub use crate::consolidate::consolidate;
pub use crate::error::{GscError, RateLimitExceeded, RemoteError, Result};
pub use crate::gate::Gate;
pub use crate::host::{connect, CodeHost, PageStream};
pub use crate::models::{FileMatch, Page, RawMatch, Scope, ScopeId, ScopeResult};
pub use crate::orchestrator::{SearchEvent, SearchMode, SearchOrchestrator, SearchStream, SearchSummary};
pub use crate::rate_limit::RateLimiter;
pub use crate::sink::{
    is_supported_export_path, ConsoleRenderer, MarkdownRenderer, Renderer, ResultSink, RunOutcome,
    SinkOptions,
};
