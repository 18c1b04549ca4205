//! Per-file batch execution with error capture and a progress bar.

use crate::error::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, warn};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Pipeline stage a report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Inspect,
    Clip,
    DegreeDays,
    Hotspots,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Inspect => "inspect",
            Stage::Clip => "clip",
            Stage::DegreeDays => "degree-days",
            Stage::Hotspots => "hotspots",
        };
        f.write_str(name)
    }
}

/// A file that was processed successfully
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub input: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Non-fatal remark, e.g. an all-NaN raster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FileOutcome {
    pub fn written(input: &Path, output: PathBuf) -> Self {
        FileOutcome {
            input: input.to_path_buf(),
            output: Some(output),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A file whose processing failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub file: PathBuf,
    pub reason: String,
}

/// Result of running one stage over a directory
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub stage: Stage,
    pub processed: Vec<FileOutcome>,
    pub failures: Vec<FileFailure>,
    /// Files never attempted because of `fail_fast`
    pub skipped: usize,
    pub elapsed_secs: f64,
}

impl BatchReport {
    pub fn new(stage: Stage) -> Self {
        BatchReport {
            stage,
            processed: Vec::new(),
            failures: Vec::new(),
            skipped: 0,
            elapsed_secs: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.processed.len() + self.failures.len() + self.skipped
    }

    pub fn notes(&self) -> impl Iterator<Item = &FileOutcome> {
        self.processed.iter().filter(|o| o.note.is_some())
    }
}

/// One CSV row per file: `stage,file,status,output,detail`.
pub fn reports_csv(reports: &[BatchReport]) -> String {
    let quote = |s: &str| format!("\"{}\"", s.replace('"', "\"\""));
    let mut out = String::from("stage,file,status,output,detail\n");
    for report in reports {
        for outcome in &report.processed {
            out.push_str(&format!(
                "{},{},ok,{},{}\n",
                report.stage,
                quote(&outcome.input.display().to_string()),
                quote(
                    &outcome
                        .output
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                ),
                quote(outcome.note.as_deref().unwrap_or(""))
            ));
        }
        for failure in &report.failures {
            out.push_str(&format!(
                "{},{},failed,\"\",{}\n",
                report.stage,
                quote(&failure.file.display().to_string()),
                quote(&failure.reason)
            ));
        }
    }
    out
}

/// How a batch reacts to failures and whether it draws a progress bar
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub fail_fast: bool,
    pub show_progress: bool,
}

fn progress_bar(len: usize, stage: Stage, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(stage.to_string());
    pb
}

/// Applies `process` to every file in order, collecting outcomes and failures.
///
/// A failing file never aborts the batch unless `fail_fast` is set, in which case
/// the remaining files are counted as skipped.
pub fn run_batch<F>(stage: Stage, files: &[PathBuf], options: &BatchOptions, mut process: F) -> BatchReport
where
    F: FnMut(&Path) -> Result<FileOutcome>,
{
    let started = Instant::now();
    let mut report = BatchReport::new(stage);
    let pb = progress_bar(files.len(), stage, options.show_progress);

    for (i, file) in files.iter().enumerate() {
        debug!("[{}] {}/{}: {}", stage, i + 1, files.len(), file.display());
        match process(file) {
            Ok(outcome) => {
                if let Some(note) = &outcome.note {
                    warn!("{}: {}", file.display(), note);
                }
                report.processed.push(outcome);
            }
            Err(e) => {
                error!("[{}] {} failed: {}", stage, file.display(), e);
                report.failures.push(FileFailure {
                    file: file.clone(),
                    reason: e.to_string(),
                });
                if options.fail_fast {
                    report.skipped = files.len() - i - 1;
                    pb.inc(1);
                    break;
                }
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    report.elapsed_secs = started.elapsed().as_secs_f64();
    report
}
