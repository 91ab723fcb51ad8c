use crate::callback::{submit, CallbackAck, GradeSubmission};
use crate::config::{PipelineConfig, StagingLayout};
use crate::error::Result;
use crate::executor::{run_grader_entry_point, run_setup_hook};
use crate::feedback::render_feedback;
use crate::privilege::PrivilegeBoundary;
use crate::reporter::{build_metadata, snapshot_workspace, write_metadata};
use crate::results::{classify, compute_score, load_result_document};
use crate::stager::{extract_archive, locate_archive, remove_staging, reset_layout};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub score: i64,
    pub passed: usize,
    pub failed: usize,
    pub acknowledgment: CallbackAck,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Owns the staging area for one run. Completed runs remove it; aborted runs
/// leave it behind for inspection until the next reset.
struct StagingGuard<'a> {
    layout: &'a StagingLayout,
    done: bool,
}

impl<'a> StagingGuard<'a> {
    fn new(layout: &'a StagingLayout) -> Self {
        Self {
            layout,
            done: false,
        }
    }

    fn complete(&mut self) {
        tracing::info!("cleanup");
        remove_staging(self.layout);
        self.done = true;
    }
}

impl Drop for StagingGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!(root = %self.layout.root.display(), "run aborted, staging area retained");
        }
    }
}

/// Runs every stage in order; the first failure aborts the run.
///
/// Expects to already be on the privileged side of `boundary`.
pub fn run_pipeline(
    config: &PipelineConfig,
    boundary: &dyn PrivilegeBoundary,
) -> Result<PipelineOutcome> {
    let started_at = Utc::now();
    let staging = &config.staging;

    tracing::info!("cleanup");
    reset_layout(staging)?;
    let mut guard = StagingGuard::new(staging);

    let archive = locate_archive(&config.workspace)?;
    tracing::info!(archive = %archive.display(), "unzip");
    let files = extract_archive(&archive, &staging.source())?;
    tracing::info!(files, "bundle extracted");

    if config.run_setup {
        run_setup_hook(config, boundary)?;
    }

    let copied = snapshot_workspace(&config.workspace.root, &staging.submission())?;
    tracing::info!(copied, "workspace snapshot taken");
    write_metadata(&staging.metadata_file(), &build_metadata(&config.context))?;

    run_grader_entry_point(config, boundary)?;

    let doc = load_result_document(&staging.results_file())?;
    let score = compute_score(&doc)?;
    let (passed, failed) = classify(&doc.tests);
    let (passed, failed) = (passed.len(), failed.len());
    let feedback = render_feedback(&doc, score, config.extended_logs);
    let acknowledgment = submit(
        &config.callback_url,
        &GradeSubmission {
            score,
            feedback: &feedback,
        },
    )?;

    guard.complete();
    Ok(PipelineOutcome {
        score,
        passed,
        failed,
        acknowledgment,
        started_at,
        finished_at: Utc::now(),
    })
}
