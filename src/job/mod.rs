//! One render job: render, validate, encode, validate.
//!
//! A [`RenderJob`] walks through [`JobState`] in order. Each stage is guarded
//! by a scan of its artifact, so work that is already done is skipped:
//!
//! ```text
//! ScanIntermediate -> (render) -> RescanIntermediate
//!     -> ScanFinal -> (encode) -> RescanFinal -> Done
//! ```
//!
//! Any error moves the job to the absorbing [`JobState::Failed`].

pub mod cleanup;
mod encode;
mod error;
pub mod perf;
pub mod prefs;
mod render;
pub mod supervise;
pub mod watchdog;

use std::fmt;
use std::sync::Arc;

use renderforged_common::{PathResolver, ScanResult};
use tokio_util::sync::CancellationToken;

use crate::config::JobParams;
use crate::scanner::ArtifactScanner;
use crate::telemetry::Telemetry;

pub use error::{JobError, Stage};
pub use perf::{FrameSample, PerformanceState};
pub use render::PROGRESS_PATTERN;
pub use watchdog::{StallWatchdog, WatchdogStatus};

/// Where a job is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    ScanIntermediate,
    Render,
    RescanIntermediate,
    ScanFinal,
    Encode,
    RescanFinal,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::ScanIntermediate => "scan intermediate",
            JobState::Render => "render",
            JobState::RescanIntermediate => "rescan intermediate",
            JobState::ScanFinal => "scan final",
            JobState::Encode => "encode",
            JobState::RescanFinal => "rescan final",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Scans of both artifacts at the end of a successful job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub intermediate: ScanResult,
    pub final_scan: ScanResult,
}

/// Drives one item through the pipeline.
pub struct RenderJob {
    name: String,
    params: JobParams,
    paths: Arc<dyn PathResolver>,
    scanner: Arc<dyn ArtifactScanner>,
    telemetry: Arc<Telemetry>,
    cancel: CancellationToken,
    state: JobState,
    perf: PerformanceState,
}

impl RenderJob {
    pub fn new(
        name: impl Into<String>,
        params: JobParams,
        paths: Arc<dyn PathResolver>,
        scanner: Arc<dyn ArtifactScanner>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            paths,
            scanner,
            telemetry,
            cancel: CancellationToken::new(),
            state: JobState::ScanIntermediate,
            perf: PerformanceState::new(),
        }
    }

    /// Stop the job when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn performance(&self) -> &PerformanceState {
        &self.perf
    }

    /// Run the job to completion.
    ///
    /// `force_intermediate` and `force_final` run a stage even when its
    /// artifact already scans valid.
    pub async fn execute(
        &mut self,
        force_intermediate: bool,
        force_final: bool,
    ) -> Result<JobOutcome, JobError> {
        match self.run(force_intermediate, force_final).await {
            Ok(outcome) => {
                self.transition(JobState::Done);
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("{} failed during {}: {}", self.name, self.state, e);
                self.transition(JobState::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        force_intermediate: bool,
        force_final: bool,
    ) -> Result<JobOutcome, JobError> {
        let item = self.params.item.name.clone();
        let intermediate_path = self.paths.intermediate_path(&item, false)?;
        let final_path = self.paths.final_path(&item, false)?;

        self.transition(JobState::ScanIntermediate);
        let mut intermediate = self.scanner.scan(&intermediate_path).await?;

        if !intermediate.valid || force_intermediate {
            self.transition(JobState::Render);
            self.render_with_stall_retry().await?;

            self.transition(JobState::RescanIntermediate);
            intermediate = self.scanner.scan(&intermediate_path).await?;

            let mut retries = self.params.policy.invalid_artifact_retries;
            while !intermediate.valid {
                if retries == 0 {
                    return Err(JobError::InvalidArtifact {
                        stage: Stage::Render,
                        path: intermediate_path,
                        message: intermediate.message,
                    });
                }
                retries -= 1;
                tracing::error!(
                    "Failed to create valid intermediate file (retrying): {}",
                    intermediate.message
                );
                self.transition(JobState::Render);
                self.render().await?;

                self.transition(JobState::RescanIntermediate);
                intermediate = self.scanner.scan(&intermediate_path).await?;
            }
        }

        self.transition(JobState::ScanFinal);
        let mut final_scan = self.scanner.scan(&final_path).await?;

        if !final_scan.valid || force_final {
            self.transition(JobState::Encode);
            self.encode().await?;

            self.transition(JobState::RescanFinal);
            final_scan = self.scanner.scan(&final_path).await?;
            if !final_scan.valid {
                return Err(JobError::InvalidArtifact {
                    stage: Stage::Encode,
                    path: final_path,
                    message: final_scan.message,
                });
            }
        }

        Ok(JobOutcome {
            intermediate,
            final_scan,
        })
    }

    async fn render_with_stall_retry(&mut self) -> Result<(), JobError> {
        let mut retries = self.params.policy.stall_retries;
        loop {
            match self.render().await {
                Err(e) if e.is_stall() && retries > 0 => {
                    retries -= 1;
                    tracing::error!("Retrying due to render timeout: {}", e);
                }
                result => return result,
            }
        }
    }

    fn transition(&mut self, next: JobState) {
        if self.state != next {
            tracing::debug!("{}: {} -> {}", self.name, self.state, next);
            self.state = next;
        }
    }
}

impl fmt::Debug for RenderJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderJob")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}
