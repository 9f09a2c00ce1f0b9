//! Rendering of a search run and the single release of the run's gate.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use futures::stream::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Platform, SessionContext};
use crate::error::{GscError, RemoteError, Result};
use crate::gate::Gate;
use crate::models::{FileMatch, ScopeResult};
use crate::orchestrator::{SearchEvent, SearchMode, SearchSummary};

const SEPARATOR: &str = "------------------------";
const NO_RESULT: &str = "No results found";
const PREVIEW_INDENT: &str = "   ";

/// How a search run ended, handed to the CLI thread through the gate.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(SearchSummary),
    Failed(RemoteError),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(_) => 0,
            RunOutcome::Failed(_) => 1,
        }
    }
}

/// Only markdown exports are supported.
pub fn is_supported_export_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
        .unwrap_or(false)
}

/// `H:MM:SS.ffffff`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        elapsed.subsec_micros()
    )
}

fn scope_heading(result: &ScopeResult) -> String {
    let scope = &result.scope;
    if !result.has_matches() {
        return format!("[{}] {}", scope.id, scope.name);
    }
    let archived = if scope.archived { "(❗Archived) " } else { "" };
    format!(
        "[{}] {}{} - {} file(s)",
        scope.id,
        archived,
        scope.name,
        result.files.len()
    )
}

fn file_label(file: &FileMatch) -> String {
    if file.start_lines.is_empty() {
        return file.file_path.clone();
    }
    let lines: Vec<String> = file.start_lines.iter().map(u32::to_string).collect();
    format!("{} (line {})", file.file_path, lines.join(", "))
}

/// `[text](target)` with the brackets in `text` escaped and the target free of
/// characters that would end it early.
fn markdown_link(text: &str, target: &str) -> String {
    let mut label = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '[' | ']') {
            label.push('\\');
        }
        label.push(c);
    }
    let target = target
        .replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29");
    format!("[{}]({})", label, target)
}

/// Byte ranges of every ASCII case-insensitive occurrence of `keyword` in `text`.
fn keyword_spans(text: &str, keyword: &str) -> Vec<(usize, usize)> {
    let haystack = text.as_bytes();
    let needle = keyword.as_bytes();
    let mut spans = Vec::new();
    if needle.is_empty() {
        return spans;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if haystack[i..i + needle.len()].eq_ignore_ascii_case(needle) {
            spans.push((i, i + needle.len()));
            i += needle.len();
        } else {
            i += 1;
        }
    }
    spans
}

/// One output target of a run. Every renderer sees the same calls.
pub trait Renderer: Send {
    fn title(&mut self, text: &str) -> io::Result<()>;

    fn scope_result(&mut self, result: &ScopeResult) -> io::Result<()>;

    fn summary(&mut self, text: &str) -> io::Result<()>;

    fn failure(&mut self, text: &str) -> io::Result<()>;
}

/// Colored terminal output.
pub struct ConsoleRenderer<W: Write + Send> {
    out: W,
    keyword: String,
    code_preview: bool,
}

impl<W: Write + Send> ConsoleRenderer<W> {
    pub fn new(out: W, keyword: &str, code_preview: bool) -> Self {
        Self {
            out,
            keyword: keyword.to_string(),
            code_preview,
        }
    }

    fn highlighted(&self, preview: &str) -> String {
        let indented = format!("{}{}", PREVIEW_INDENT, preview.trim_end())
            .replace('\n', &format!("\n{}", PREVIEW_INDENT));
        let mut out = String::new();
        let mut last = 0;
        for (start, end) in keyword_spans(&indented, &self.keyword) {
            out.push_str(&indented[last..start].dimmed().to_string());
            out.push_str(&indented[start..end].on_bright_white().to_string());
            last = end;
        }
        out.push_str(&indented[last..].dimmed().to_string());
        out
    }
}

impl<W: Write + Send> Renderer for ConsoleRenderer<W> {
    fn title(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text.bright_blue())
    }

    fn scope_result(&mut self, result: &ScopeResult) -> io::Result<()> {
        writeln!(self.out, "{}", SEPARATOR)?;
        let heading = scope_heading(result);

        if !result.has_matches() {
            writeln!(self.out, "{}", heading.bright_magenta().dimmed())?;
            writeln!(self.out, "{}", NO_RESULT.dimmed())?;
            return self.out.flush();
        }

        writeln!(self.out, "{}", heading.bright_magenta())?;
        for file in &result.files {
            writeln!(self.out, "{}", file_label(file))?;
            if self.code_preview && !file.preview.is_empty() {
                let preview = self.highlighted(&file.preview);
                writeln!(self.out, "{}", preview)?;
            }
        }
        self.out.flush()
    }

    fn summary(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", SEPARATOR)?;
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }

    fn failure(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text.bright_red())?;
        self.out.flush()
    }
}

/// Markdown export, mirroring the console output.
pub struct MarkdownRenderer<W: Write + Send> {
    out: W,
    code_preview: bool,
}

impl MarkdownRenderer<BufWriter<File>> {
    /// Create (or truncate) the export file at `path`.
    pub fn create(path: &Path, code_preview: bool) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            GscError::Io(io::Error::new(
                e.kind(),
                format!("Cannot write {}: {}", path.display(), e),
            ))
        })?;
        Ok(Self::new(BufWriter::new(file), code_preview))
    }
}

impl<W: Write + Send> MarkdownRenderer<W> {
    pub fn new(out: W, code_preview: bool) -> Self {
        Self { out, code_preview }
    }
}

impl<W: Write + Send> Renderer for MarkdownRenderer<W> {
    fn title(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "# {}\n", text)
    }

    fn scope_result(&mut self, result: &ScopeResult) -> io::Result<()> {
        writeln!(self.out, "## {}\n", scope_heading(result))?;

        if !result.has_matches() {
            return writeln!(self.out, "~~{}~~\n", NO_RESULT);
        }

        for file in &result.files {
            writeln!(
                self.out,
                "- {}",
                markdown_link(&file_label(file), &file.url(&result.scope))
            )?;
            if self.code_preview && !file.preview.is_empty() {
                writeln!(self.out, "\n```\n{}\n```\n", file.preview.trim_end())?;
            }
        }
        writeln!(self.out)
    }

    fn summary(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }

    fn failure(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }
}

/// What the sink needs to know about the run it renders.
#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub platform: Platform,
    pub env_name: String,
    pub keyword: String,
    pub multi_scope: bool,
    pub ignore_no_result: bool,
}

impl SinkOptions {
    pub fn from_session(ctx: &SessionContext) -> Self {
        Self {
            platform: ctx.env.platform,
            env_name: ctx.env.name.clone(),
            keyword: ctx.keyword.clone(),
            multi_scope: ctx.target.is_multi_scope(),
            ignore_no_result: ctx.ignore_no_result,
        }
    }
}

/// Consumes a search stream: renders every event, then opens the gate once.
pub struct ResultSink {
    options: SinkOptions,
    renderers: Vec<Box<dyn Renderer>>,
    progress: ProgressBar,
    gate: Arc<Gate<RunOutcome>>,
    started: Instant,
    scopes_with_matches: usize,
    files_found: usize,
}

impl ResultSink {
    pub fn new(options: SinkOptions, gate: Arc<Gate<RunOutcome>>) -> Self {
        Self {
            options,
            renderers: Vec::new(),
            progress: ProgressBar::hidden(),
            gate,
            started: Instant::now(),
            scopes_with_matches: 0,
            files_found: 0,
        }
    }

    /// Console output, a spinner, and a markdown export when the session asks for one.
    pub fn for_session(ctx: &SessionContext, gate: Arc<Gate<RunOutcome>>) -> Result<Self> {
        let mut sink = Self::new(SinkOptions::from_session(ctx), gate).with_renderer(Box::new(
            ConsoleRenderer::new(io::stdout(), &ctx.keyword, ctx.code_preview),
        ));
        if let Some(path) = &ctx.output_path {
            sink = sink.with_renderer(Box::new(MarkdownRenderer::create(path, ctx.code_preview)?));
            info!("Exporting results to {}", path.display());
        }
        if !ctx.debug {
            sink = sink.with_progress(spinner(&ctx.keyword));
        }
        Ok(sink)
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderers.push(renderer);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Drain `stream` until its terminal event and return the released outcome.
    pub async fn consume<S>(mut self, mut stream: S) -> RunOutcome
    where
        S: Stream<Item = SearchEvent> + Unpin,
    {
        self.started = Instant::now();
        let title = format!(
            "[{}] (\"{}\" env) Searching for \"{}\" ...",
            self.options.platform.name(),
            self.options.env_name,
            self.options.keyword
        );
        self.render(|r| r.title(&title));

        while let Some(event) = stream.next().await {
            match event {
                SearchEvent::Matched(result) => self.on_event(&result),
                SearchEvent::Complete(summary) => return self.on_completion(summary),
                SearchEvent::Failed(e) => return self.on_error(e),
            }
        }

        self.on_error(RemoteError {
            scope_id: None,
            status: None,
            message: "search pipeline stopped unexpectedly".to_string(),
        })
    }

    fn on_event(&mut self, result: &ScopeResult) {
        if result.has_matches() {
            self.scopes_with_matches += 1;
            self.files_found += result.files.len();
        } else if self.options.multi_scope && self.options.ignore_no_result {
            debug!("Hiding scope {} without results", result.scope.id);
            return;
        }
        self.render(|r| r.scope_result(result));
    }

    fn on_completion(mut self, summary: SearchSummary) -> RunOutcome {
        let elapsed = format_elapsed(self.started.elapsed());
        let (count, unit) = match summary.mode {
            SearchMode::MultiScope => (self.scopes_with_matches, "repository(s)"),
            SearchMode::SingleScope => (self.files_found, "file(s)"),
        };
        let count = if count == 0 {
            "NO".to_string()
        } else {
            count.to_string()
        };
        let text = format!(
            "[{}] There are {} {} containing \"{}\".",
            elapsed, count, unit, self.options.keyword
        );
        info!(
            "Search finished: {} scope(s) searched, {} with matches",
            summary.scopes_searched, self.scopes_with_matches
        );
        self.render(|r| r.summary(&text));
        self.finish(RunOutcome::Completed(summary))
    }

    fn on_error(mut self, err: RemoteError) -> RunOutcome {
        error!("Search failed: {}", err);
        let text = format!("[Error] {}", err);
        self.render(|r| r.failure(&text));
        self.finish(RunOutcome::Failed(err))
    }

    fn finish(self, outcome: RunOutcome) -> RunOutcome {
        self.progress.finish_and_clear();
        if !self.gate.release(outcome.clone()) {
            warn!("Search outcome was already released");
        }
        outcome
    }

    fn render<F>(&mut self, mut call: F)
    where
        F: FnMut(&mut dyn Renderer) -> io::Result<()>,
    {
        let renderers = &mut self.renderers;
        self.progress.suspend(|| {
            for renderer in renderers.iter_mut() {
                if let Err(e) = call(renderer.as_mut()) {
                    warn!("Failed to write search output: {}", e);
                }
            }
        });
    }
}

fn spinner(keyword: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    pb.set_message(format!("Searching for \"{}\" ...", keyword));
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
