//! Command dispatch: everything between parsed arguments and an exit code.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::CommandFactory;
use colored::Colorize;
use tracing::{debug, info};

use crate::args::{Cli, Command, EnvArgs, SearchArgs};
use crate::config::{validate_env_name, Env, EnvStore, SearchTarget, SessionContext};
use crate::error::{GscError, Result};
use crate::gate::Gate;
use crate::host;
use crate::models::ScopeId;
use crate::orchestrator::SearchOrchestrator;
use crate::sink::{is_supported_export_path, ResultSink, RunOutcome};

/// Run a parsed command line and return the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Search(args) => run_search(args),
        Command::Env(args) => {
            let mut store = EnvStore::open(EnvStore::default_path()?)?;
            run_env(&mut store, args, &mut io::stdin().lock(), &mut io::stdout())
        }
    }
}

/// Resolve the session for a `search` invocation. Nothing here touches the network.
pub fn session_from_args(args: SearchArgs, store: &EnvStore) -> Result<SessionContext> {
    let keyword = args.keyword.trim().to_string();
    if keyword.is_empty() {
        return Err(GscError::Validation("Keyword must not be empty.".to_string()));
    }

    if let Some(path) = &args.output {
        if !is_supported_export_path(path) {
            return Err(GscError::Validation(format!(
                "Output file \"{}\" is not supported. Use a .md or .markdown file.",
                path.display()
            )));
        }
    }

    let env = store.resolve(args.environment.as_deref())?;
    let target = match args.project {
        Some(project) => match project.parse::<ScopeId>() {
            Ok(ScopeId::Path(path)) if path.is_empty() => {
                return Err(GscError::Validation("Project must not be empty.".to_string()))
            }
            Ok(scope_id) => SearchTarget::Scope(scope_id),
            Err(never) => match never {},
        },
        None => SearchTarget::Group(args.group.filter(|g| !g.trim().is_empty())),
    };
    let workers = args
        .concurrency
        .map(usize::from)
        .unwrap_or_else(num_cpus::get)
        .max(1);

    Ok(SessionContext {
        env,
        keyword,
        target,
        output_path: args.output,
        code_preview: args.code_preview,
        ignore_no_result: args.ignore_no_result,
        debug: args.debug,
        workers,
    })
}

/// Run one search on a dedicated worker pool and block until the sink reports back.
pub fn run_search(args: SearchArgs) -> Result<i32> {
    let store = EnvStore::open(EnvStore::default_path()?)?;
    let ctx = session_from_args(args, &store)?;
    debug!("Session: env={} target={:?} workers={}", ctx.env.name, ctx.target, ctx.workers);

    let host = host::connect(&ctx.env).map_err(|e| {
        GscError::Config(format!("Environment \"{}\" cannot be used: {}", ctx.env.name, e))
    })?;

    let gate = Arc::new(Gate::new());
    let sink = ResultSink::for_session(&ctx, gate.clone())?;
    let orchestrator = SearchOrchestrator::new(host, ctx.workers);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(ctx.workers)
        .thread_name("gsc-worker")
        .enable_all()
        .build()?;

    runtime.spawn(async move {
        let stream = orchestrator.search(&ctx);
        sink.consume(stream).await
    });

    let outcome = gate.wait();
    if let RunOutcome::Completed(summary) = &outcome {
        info!("Run completed after searching {} scope(s)", summary.scopes_searched);
    }
    runtime.shutdown_background();

    Ok(outcome.exit_code())
}

/// Run an `env` action against `store`, prompting on `input` for missing values.
pub fn run_env<R, W>(store: &mut EnvStore, args: EnvArgs, input: &mut R, out: &mut W) -> Result<i32>
where
    R: BufRead,
    W: Write,
{
    if !args.has_action() {
        let mut cmd = Cli::command();
        if let Some(env_cmd) = cmd.find_subcommand_mut("env") {
            writeln!(out, "{}", env_cmd.render_help())?;
        }
        return Ok(0);
    }

    if args.list {
        list_envs(store, out)?;
    } else if let Some(name) = &args.new {
        new_env(store, name, &args, input, out)?;
    } else if let Some(name) = &args.default {
        store.set_default(name)?;
        writeln!(out, "{}", format!("\"{}\" is now the default environment.", name).green())?;
    } else if let Some(name) = &args.remove {
        if !store.remove(name)? {
            return Err(not_found(name));
        }
        writeln!(out, "{}", format!("Environment \"{}\" is removed.", name).green())?;
        match store.default_env() {
            Some(env) => writeln!(out, "Default environment: \"{}\"", env.name)?,
            None => writeln!(out, "There is no environment left.")?,
        }
    } else if let Some(name) = &args.info {
        let env = store.get(name).ok_or_else(|| not_found(name))?;
        print_env_info(&env, store.is_default(name), out)?;
    }
    Ok(0)
}

fn not_found(name: &str) -> GscError {
    GscError::Config(format!("\"{}\" is not existed in your environment list.", name))
}

fn list_envs<W: Write>(store: &EnvStore, out: &mut W) -> Result<()> {
    let envs = store.envs();
    if envs.is_empty() {
        writeln!(
            out,
            "There is no environment.\nTry `gsc env --new <environment_name>` to create one."
        )?;
        return Ok(());
    }
    for env in envs {
        let line = format!("{} ({}) {}", env.name, env.platform.name(), env.host_name);
        if store.is_default(&env.name) {
            writeln!(out, "* {}", line.green())?;
        } else {
            writeln!(out, "  {}", line)?;
        }
    }
    Ok(())
}

fn new_env<R: BufRead, W: Write>(
    store: &mut EnvStore,
    name: &str,
    args: &EnvArgs,
    input: &mut R,
    out: &mut W,
) -> Result<()> {
    validate_env_name(name)?;

    let host_name = match &args.host {
        Some(host) => host.trim().to_string(),
        None => prompt(input, out, "Host name", Some(args.platform.default_host()))?,
    };
    let private_token = match &args.token {
        Some(token) => token.trim().to_string(),
        None => prompt(input, out, "Access token", None)?,
    };
    if host_name.is_empty() {
        return Err(GscError::Validation("Host name must not be empty.".to_string()));
    }
    if private_token.is_empty() {
        return Err(GscError::Validation("Access token must not be empty.".to_string()));
    }

    let replaced = store.contains(name);
    store.upsert(Env {
        name: name.to_string(),
        platform: args.platform,
        host_name,
        private_token,
        verify_ssl: !args.insecure,
    })?;

    let verb = if replaced { "updated" } else { "saved" };
    writeln!(out, "{}", format!("Environment \"{}\" is {}.", name, verb).green())?;
    if store.is_default(name) {
        writeln!(out, "\"{}\" is the default environment.", name)?;
    }
    debug!("Environment file: {}", store.path().display());
    Ok(())
}

fn print_env_info<W: Write>(env: &Env, is_default: bool, out: &mut W) -> Result<()> {
    writeln!(out, "Name:       {}", env.name.bright_blue())?;
    writeln!(out, "Platform:   {}", env.platform.name())?;
    writeln!(out, "Host:       {}", env.host_name)?;
    writeln!(out, "Token:      {}", env.masked_token())?;
    writeln!(out, "Verify SSL: {}", env.verify_ssl)?;
    writeln!(out, "Default:    {}", is_default)?;
    Ok(())
}

fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    label: &str,
    default: Option<&str>,
) -> Result<String> {
    match default {
        Some(default) => write!(out, "{} [{}]: ", label, default)?,
        None => write!(out, "{}: ", label)?,
    }
    out.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let value = line.trim();
    Ok(if value.is_empty() {
        default.unwrap_or_default().to_string()
    } else {
        value.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    use clap::Parser;
    use tempfile::{tempdir, TempDir};

    use crate::config::Platform;

    fn store_with(names: &[&str]) -> (TempDir, EnvStore) {
        let dir = tempdir().unwrap();
        let mut store = EnvStore::open(dir.path().join("environments.env")).unwrap();
        for name in names {
            store
                .upsert(Env {
                    name: name.to_string(),
                    platform: Platform::GitLab,
                    host_name: "https://gitlab.example.com".into(),
                    private_token: "glpat-abcdef".into(),
                    verify_ssl: true,
                })
                .unwrap();
        }
        (dir, store)
    }

    fn search_args(argv: &[&str]) -> SearchArgs {
        let mut full = vec!["gsc", "search"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Search(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn env_args(argv: &[&str]) -> EnvArgs {
        let mut full = vec!["gsc", "env"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Env(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn run_env_with(store: &mut EnvStore, argv: &[&str], input: &str) -> (Result<i32>, String) {
        colored::control::set_override(false);
        let mut out = Vec::new();
        let result = run_env(store, env_args(argv), &mut Cursor::new(input.to_string()), &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_session_for_group_search() {
        let (_dir, store) = store_with(&["work"]);
        let ctx = session_from_args(
            search_args(&["needle", "-g", "team", "-o", "out.MD", "-c", "3"]),
            &store,
        )
        .unwrap();
        assert_eq!(ctx.env.name, "work");
        assert_eq!(ctx.keyword, "needle");
        assert_eq!(ctx.target, SearchTarget::Group(Some("team".into())));
        assert_eq!(ctx.output_path, Some(PathBuf::from("out.MD")));
        assert_eq!(ctx.workers, 3);
    }

    #[test]
    fn test_session_for_project_search() {
        let (_dir, store) = store_with(&["work"]);
        let ctx = session_from_args(search_args(&["needle", "-p", "2110"]), &store).unwrap();
        assert_eq!(ctx.target, SearchTarget::Scope(ScopeId::Numeric(2110)));
        assert!(ctx.workers >= 1);

        let ctx = session_from_args(search_args(&["needle"]), &store).unwrap();
        assert_eq!(ctx.target, SearchTarget::Group(None));
    }

    #[test]
    fn test_session_validation_errors() {
        let (_dir, store) = store_with(&["work"]);

        let err = session_from_args(search_args(&["needle", "-o", "out.txt"]), &store).unwrap_err();
        assert!(matches!(err, GscError::Validation(_)));
        assert_eq!(err.exit_code(), 2);

        let err = session_from_args(search_args(&["   "]), &store).unwrap_err();
        assert!(matches!(err, GscError::Validation(_)));

        let err = session_from_args(search_args(&["needle", "-e", "nope"]), &store).unwrap_err();
        assert!(matches!(err, GscError::Config(_)));

        let (_dir, empty) = store_with(&[]);
        let err = session_from_args(search_args(&["needle"]), &empty).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_env_new_prompts_for_missing_values() {
        let (_dir, mut store) = store_with(&[]);
        let (result, out) = run_env_with(&mut store, &["-n", "work"], "\nglpat-secret\n");
        assert_eq!(result.unwrap(), 0);
        assert!(out.contains("Host name [https://gitlab.com]: "));
        assert!(out.contains("Environment \"work\" is saved."));

        let env = store.get("work").unwrap();
        assert_eq!(env.host_name, "https://gitlab.com");
        assert_eq!(env.private_token, "glpat-secret");
        assert!(store.is_default("work"));
    }

    #[test]
    fn test_env_new_rejects_bad_input() {
        let (_dir, mut store) = store_with(&[]);
        let (result, _) = run_env_with(&mut store, &["-n", "bad name", "--host", "h", "--token", "t"], "");
        assert!(matches!(result, Err(GscError::Validation(_))));

        let (result, _) = run_env_with(&mut store, &["-n", "work", "--host", "h"], "\n");
        assert!(matches!(result, Err(GscError::Validation(_))));
        assert!(store.envs().is_empty());
    }

    #[test]
    fn test_env_list_default_remove_and_info() {
        let (_dir, mut store) = store_with(&["a", "b"]);

        let (_, out) = run_env_with(&mut store, &["-l"], "");
        assert!(out.contains("* a (GitLab) https://gitlab.example.com"));
        assert!(out.contains("  b (GitLab)"));

        let (result, _) = run_env_with(&mut store, &["-d", "b"], "");
        assert_eq!(result.unwrap(), 0);
        assert!(store.is_default("b"));

        let (_, out) = run_env_with(&mut store, &["-i", "b"], "");
        assert!(out.contains("Token:      glpa********"));
        assert!(out.contains("Default:    true"));

        let (_, out) = run_env_with(&mut store, &["-r", "b"], "");
        assert!(out.contains("Environment \"b\" is removed."));
        assert!(out.contains("Default environment: \"a\""));

        let (result, _) = run_env_with(&mut store, &["-r", "b"], "");
        assert_eq!(result.unwrap_err().exit_code(), 2);
    }

    #[test]
    fn test_env_without_action_prints_help() {
        let (_dir, mut store) = store_with(&[]);
        let (result, out) = run_env_with(&mut store, &[], "");
        assert_eq!(result.unwrap(), 0);
        assert!(out.contains("--new"));
    }
}
