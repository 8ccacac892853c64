//! The render stage: runs the renderer and watches it for stalls.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use renderforged_process::{
    resolve_program, BlockExtractor, ChildProcessSet, Extracted, ManagedProcess, Marker,
    ProcessTree, ToolCommand,
};

use super::perf::PerformanceState;
use super::supervise::{ServiceLoop, StageOutput};
use super::watchdog::StallWatchdog;
use super::{cleanup, prefs, JobError, RenderJob, Stage};
use crate::telemetry::Telemetry;

/// Renderer progress line: elapsed time and frame number.
pub const PROGRESS_PATTERN: &str = r"PROGRESS:\s+([0-9:.]+)\s+\((\d+)\)";

impl RenderJob {
    /// Render the intermediate artifact once.
    ///
    /// On any failure the renderer's process tree is killed and the partial
    /// artifact deleted before the error is returned.
    pub(super) async fn render(&mut self) -> Result<(), JobError> {
        let settings = &self.params.renderer;
        let policy = &self.params.policy;

        let tags = prefs::renderer_tags(settings);
        if !tags.is_empty() {
            self.telemetry.add_tags(&tags).await;
        }

        let output_path = self.paths.intermediate_path(&self.params.item.name, true)?;
        let project_path = self.paths.project_path(&self.params.item.project);
        let child_pattern = Regex::new(&settings.child_process_pattern)
            .map_err(renderforged_process::Error::from)?;
        let program = resolve_program(&settings.program())?;

        tracing::info!(
            "Launching renderer to render {} from project {} comp {}",
            output_path.display(),
            project_path.display(),
            self.params.item.comp
        );
        let process = ToolCommand::new(program)
            .args(settings.build_args(&project_path, &self.params.item.comp, &output_path))
            .kill_settle(policy.kill_settle())
            .exit_grace(policy.exit_code_grace())
            .spawn()?;

        self.supervise_render(process, &output_path, child_pattern)
            .await
    }

    /// Service a launched renderer until it exits or fails.
    async fn supervise_render(
        &mut self,
        mut process: ManagedProcess,
        output_path: &Path,
        child_pattern: Regex,
    ) -> Result<(), JobError> {
        let policy = &self.params.policy;

        let mut extractor = BlockExtractor::new(vec![Marker::record("frame", PROGRESS_PATTERN)?]);
        let mut progress = RenderProgress::new(&self.name, &self.telemetry, &mut self.perf, child_pattern);
        let watchdog = policy.watchdog_enabled.then(|| {
            StallWatchdog::new(
                policy.watchdog_timeout(),
                policy.watchdog_warning_margin(),
                Instant::now(),
            )
        });

        let serviced = ServiceLoop::new(Stage::Render, policy, &self.cancel)
            .run(&mut process, &mut extractor, &mut progress, watchdog)
            .await;

        if let Err(e) = serviced {
            tracing::error!("Render of {} failed: {}", self.name, e);
            process.kill(progress.children.as_slice()).await;
            cleanup::delete_on_failure(output_path, policy).await?;
            return Err(e);
        }

        match process.exit_code().await {
            Some(0) => {
                tracing::info!("Successful: {}", self.name);
                Ok(())
            }
            code => {
                tracing::error!("+++RETURN CODE {:?}: {}", code, self.name);
                cleanup::delete_on_failure(output_path, policy).await?;
                Err(JobError::ExternalProcess {
                    tool: process.program().to_string(),
                    code,
                })
            }
        }
    }
}

/// Per-frame bookkeeping for one render attempt.
struct RenderProgress<'a> {
    job_name: &'a str,
    telemetry: &'a Telemetry,
    perf: &'a mut PerformanceState,
    children: ChildProcessSet,
    child_pattern: Regex,
    started: Instant,
}

impl<'a> RenderProgress<'a> {
    fn new(
        job_name: &'a str,
        telemetry: &'a Telemetry,
        perf: &'a mut PerformanceState,
        child_pattern: Regex,
    ) -> Self {
        Self {
            job_name,
            telemetry,
            perf,
            children: ChildProcessSet::new(),
            child_pattern,
            started: Instant::now(),
        }
    }

    async fn on_frame(&mut self, frame: u64, at: Instant) {
        let Some(sample) = self.perf.record_frame(at) else {
            return;
        };

        self.telemetry
            .report_scalar(
                "Render performance",
                "Renderer seconds per frame",
                sample.interval,
                frame,
            )
            .await;
        self.telemetry
            .report_scalar(
                "Moving average render performance",
                "Renderer seconds per frame moving average",
                sample.moving_average,
                frame,
            )
            .await;

        if frame == 10 || frame % 100 == 0 {
            tracing::info!(
                "Elapsed {} frame {} avg: {:.3}s/frame: {}",
                format_elapsed(self.started.elapsed()),
                frame,
                sample.moving_average,
                self.job_name
            );
            self.report_cpu(frame).await;
        }
    }

    async fn report_cpu(&mut self, frame: u64) {
        let samples: Vec<_> = {
            let tree = ProcessTree::snapshot();
            self.children
                .iter()
                .map(|pid| (pid, tree.cpu_sample(pid)))
                .collect()
        };

        for (pid, sample) in samples {
            match sample {
                Some(sample) => {
                    tracing::info!(
                        "CPU time of renderer process with pid {}: {}",
                        pid,
                        format_elapsed(sample.cpu_time)
                    );
                    self.telemetry
                        .report_scalar(
                            "CPU cumulative time",
                            "Renderer CPU seconds",
                            sample.cpu_time.as_secs_f64(),
                            frame,
                        )
                        .await;
                }
                None => {
                    tracing::info!("Renderer process with PID {} no longer active", pid);
                    self.children.prune(pid);
                }
            }
        }
    }
}

#[async_trait]
impl<'a> StageOutput for RenderProgress<'a> {
    async fn on_extracted(&mut self, item: Extracted, at: Instant) -> Result<(), JobError> {
        match item {
            Extracted::Record { groups, .. } => {
                match groups.get(1).and_then(|frame| frame.parse::<u64>().ok()) {
                    Some(frame) => self.on_frame(frame, at).await,
                    None => tracing::warn!("Unreadable frame number in progress line: {:?}", groups),
                }
            }
            Extracted::Line(line) => tracing::info!("{}", line),
            Extracted::Block { .. } | Extracted::Absorbed => {}
        }
        Ok(())
    }

    async fn after_burst(&mut self, process: &ManagedProcess) {
        let found = process.discover_children(&self.child_pattern);
        for pid in self.children.track(found) {
            tracing::info!("Captured new renderer process with PID {}", pid);
        }
    }
}

/// `H:MM:SS`.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
