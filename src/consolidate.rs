//! Merges line-level search hits into per-file results.
//!
//! Hits are folded in arrival order: a hit on the same path as the previous
//! one extends the running [`FileMatch`], a hit on another path closes it.
//! A final pass then keeps a single record per path, the **last** one seen.
//! Hits for a file that arrive in separate runs therefore lose the earlier
//! runs' line numbers. This lossy behavior is kept on purpose (existing
//! output depends on it) and is pinned by the tests below.

use std::collections::HashMap;

use crate::models::{FileMatch, RawMatch};

/// Consolidate the hits of one scope, in page-delivery order.
pub fn consolidate<I>(matches: I) -> Vec<FileMatch>
where
    I: IntoIterator<Item = RawMatch>,
{
    keep_last_per_path(accumulate_runs(matches))
}

/// Fold contiguous hits on the same path into one record per run.
fn accumulate_runs<I>(matches: I) -> Vec<FileMatch>
where
    I: IntoIterator<Item = RawMatch>,
{
    let mut runs: Vec<FileMatch> = Vec::new();
    let mut current: Option<FileMatch> = None;

    for raw in matches {
        match current.as_mut() {
            Some(run) if run.file_path == raw.file_path => {
                run.start_lines.extend(raw.start_line);
                // The newest hit carries the preview, like the run's last record would.
                run.preview = raw.preview;
            }
            _ => {
                if let Some(finished) = current.take() {
                    runs.push(finished);
                }
                current = Some(FileMatch::from_raw(raw));
            }
        }
    }

    if let Some(finished) = current {
        runs.push(finished);
    }
    runs
}

/// Keep one record per path: the last run wins, in first-seen path order.
fn keep_last_per_path(runs: Vec<FileMatch>) -> Vec<FileMatch> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<FileMatch> = Vec::with_capacity(runs.len());

    for run in runs {
        match slots.get(&run.file_path) {
            Some(&slot) => kept[slot] = run,
            None => {
                slots.insert(run.file_path.clone(), kept.len());
                kept.push(run);
            }
        }
    }
    kept
}
