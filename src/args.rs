use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::config::Platform;

/// Search code across GitLab projects and GitHub repositories from the command line,
/// with concurrent per-project searches, rate-limit handling and markdown export.
#[derive(Debug, Parser)]
#[command(name = "gsc", author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search for a keyword in one project, a group, or all of your own projects.
    Search(SearchArgs),

    /// Manage the environments (host + token) gsc searches with.
    Env(EnvArgs),
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Text to search for.
    pub keyword: String,

    /// Project id or path (GitLab), or `owner/repo` (GitHub).
    #[arg(short, long, value_name = "ID", conflicts_with = "group")]
    pub project: Option<String>,

    /// Group id or path (GitLab), or owner (GitHub). Without it and without
    /// --project, your own projects are searched.
    #[arg(short, long, value_name = "ID_OR_PATH")]
    pub group: Option<String>,

    /// Environment to use instead of the default one.
    #[arg(short, long, value_name = "NAME", env = "GSC_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Also export the results to a markdown file (.md or .markdown).
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Log HTTP traffic and pipeline state to stderr.
    #[arg(short, long)]
    pub debug: bool,

    /// Show the matched code under each file.
    #[arg(long)]
    pub code_preview: bool,

    /// Hide projects without results when searching many projects.
    #[arg(long)]
    pub ignore_no_result: bool,

    /// Number of worker threads and concurrent project searches.
    /// Defaults to the number of CPUs.
    #[arg(short, long, value_name = "NUM", value_parser = clap::value_parser!(u16).range(1..=256))]
    pub concurrency: Option<u16>,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("action")
        .args(["new", "default", "remove", "info", "list"])
        .multiple(false)
))]
pub struct EnvArgs {
    /// Create an environment, or replace the one with this name.
    #[arg(short, long, value_name = "NAME")]
    pub new: Option<String>,

    /// Make an environment the default one.
    #[arg(short, long, value_name = "NAME")]
    pub default: Option<String>,

    /// Remove an environment.
    #[arg(short, long, value_name = "NAME")]
    pub remove: Option<String>,

    /// Show the settings of an environment.
    #[arg(short, long, value_name = "NAME")]
    pub info: Option<String>,

    /// List all environments.
    #[arg(short, long)]
    pub list: bool,

    /// Platform of the new environment.
    #[arg(long, value_enum, default_value_t = Platform::GitLab, requires = "new")]
    pub platform: Platform,

    /// Host of the new environment. Prompted for when omitted.
    #[arg(long, value_name = "URL", requires = "new")]
    pub host: Option<String>,

    /// Access token of the new environment. Prompted for when omitted.
    #[arg(long, value_name = "TOKEN", requires = "new")]
    pub token: Option<String>,

    /// Skip TLS certificate verification for the new environment.
    #[arg(long, requires = "new")]
    pub insecure: bool,
}

impl EnvArgs {
    pub fn has_action(&self) -> bool {
        self.new.is_some()
            || self.default.is_some()
            || self.remove.is_some()
            || self.info.is_some()
            || self.list
    }
}
